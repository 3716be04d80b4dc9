use std::{
    fs::{File, OpenOptions},
    io::{Read, Result, Seek, SeekFrom, Write},
    path::Path,
    sync::{Mutex, PoisonError},
};

use log::debug;

use crate::disk::{
    block_device::BlockDevice,
    out_of_range,
    types::{Sector, SectorId, SECTOR_SIZE},
};

/// 以普通文件作为后端的虚拟磁盘（disk.img）
#[derive(Debug)]
pub struct FileDisk {
    file: Mutex<File>,
    sectors: u32,
}

impl FileDisk {
    /// 打开（或创建）磁盘镜像，不足 `sectors` 个扇区时扩展文件长度。
    /// 已有镜像比请求的大时保留原大小。
    pub fn open(path: impl AsRef<Path>, sectors: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;

        let wanted = sectors as u64 * SECTOR_SIZE as u64;
        let len = file.metadata()?.len();
        if len < wanted {
            debug!(
                "extending {} from {} to {} bytes",
                path.as_ref().display(),
                len,
                wanted
            );
            file.set_len(wanted)?;
        }

        let sectors = (file.metadata()?.len() / SECTOR_SIZE as u64) as u32;
        Ok(Self {
            file: Mutex::new(file),
            sectors,
        })
    }

    fn offset_of(&self, sector: SectorId) -> Result<u64> {
        if sector >= self.sectors {
            return Err(out_of_range(sector, self.sectors));
        }
        Ok(sector as u64 * SECTOR_SIZE as u64)
    }
}

impl BlockDevice for FileDisk {
    fn read_block(&self, sector: SectorId, buf: &mut Sector) -> Result<()> {
        let offset = self.offset_of(sector)?;
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_block(&self, sector: SectorId, buf: &Sector) -> Result<()> {
        let offset = self.offset_of(sector)?;
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn sector_count(&self) -> u32 {
        self.sectors
    }
}
