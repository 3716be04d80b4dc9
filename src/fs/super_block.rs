use serde::{Deserialize, Serialize};

use crate::{
    disk::{BlockDevice, Sector, SECTOR_SIZE},
    fs::{
        config::{FREE_MAP_START_SECTOR, FS_MAGIC, SUPER_BLOCK_SECTOR},
        error::{FsError, Result},
        free_map::FreeMap,
    },
    utils::current_timestamp,
};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    pub fs_type: String, // 文件系统标识
    pub magic: u64,      // 魔数，用于识别文件系统
    /** 扇区信息 */
    pub sector_count: u32, // 设备总扇区数
    /** 位图信息 */
    pub free_map_start: u32,   // 空闲位图起始扇区
    pub free_map_sectors: u32, // 空闲位图占用的扇区数
    /** 其他元信息 */
    pub formatted_at: i64, // 格式化时间（Unix 秒）
}

impl SuperBlock {
    pub fn new(sector_count: u32) -> Self {
        Self {
            fs_type: "GrowFS".to_string(),
            magic: FS_MAGIC,
            sector_count,
            free_map_start: FREE_MAP_START_SECTOR,
            free_map_sectors: FreeMap::sectors_for(sector_count),
            formatted_at: current_timestamp(),
        }
    }

    /// 超级块加空闲位图，格式化时要预留的扇区数
    pub fn reserved_sectors(&self) -> u32 {
        self.free_map_start + self.free_map_sectors
    }

    pub fn load(device: &dyn BlockDevice) -> Result<Self> {
        let mut buf: Sector = [0; SECTOR_SIZE];
        device.read_block(SUPER_BLOCK_SECTOR, &mut buf)?;
        let sb: SuperBlock = bincode::deserialize(&buf)
            .map_err(|e| FsError::Corrupted(format!("unreadable super block: {}", e)))?;

        if sb.magic != FS_MAGIC {
            return Err(FsError::Corrupted(format!("bad magic {:#x}", sb.magic)));
        }
        if sb.sector_count > device.sector_count() {
            return Err(FsError::Corrupted(format!(
                "super block describes {} sectors but the device has {}",
                sb.sector_count,
                device.sector_count()
            )));
        }
        Ok(sb)
    }

    pub fn sync(&self, device: &dyn BlockDevice) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        if bytes.len() > SECTOR_SIZE {
            return Err(FsError::Corrupted("super block larger than a sector".into()));
        }
        let mut buf: Sector = [0; SECTOR_SIZE];
        buf[..bytes.len()].copy_from_slice(&bytes);
        device.write_block(SUPER_BLOCK_SECTOR, &buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;

    #[test]
    fn round_trips_through_sector_zero() {
        let disk = MemDisk::new(9000);
        let sb = SuperBlock::new(9000);
        assert_eq!(sb.free_map_sectors, 3);
        assert_eq!(sb.reserved_sectors(), 4);
        sb.sync(&disk).unwrap();
        assert_eq!(SuperBlock::load(&disk).unwrap(), sb);
    }

    #[test]
    fn blank_device_is_not_a_file_system() {
        let disk = MemDisk::new(16);
        assert!(matches!(
            SuperBlock::load(&disk),
            Err(FsError::Corrupted(_))
        ));
    }
}
