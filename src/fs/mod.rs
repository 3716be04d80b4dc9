use std::sync::Arc;

use log::info;

use crate::{
    disk::{BlockDevice, SectorId},
    fs::{
        config::SUPER_BLOCK_SECTOR,
        error::{FsError, Result},
        free_map::{FreeMap, SectorAllocator},
        registry::InodeRegistry,
        super_block::SuperBlock,
    },
};

pub mod config;
pub mod error;
pub mod file;
pub mod free_map;
pub mod index;
pub mod inode;
pub mod record;
pub mod registry;
pub mod super_block;

pub use file::{File, FileTable, OpenMode};
pub use inode::Inode;
pub use record::FileRecord;

/// `stat` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeStat {
    pub sector: SectorId,
    pub length: u32,
    pub data_sectors: usize,
    pub index_sectors: usize,
    pub open_count: u32,
    pub removed: bool,
}

/// 空间使用情况（单位：扇区）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub total: u32,
    pub used: u32,
    pub free: u32,
}

pub struct FileSystem {
    device: Arc<dyn BlockDevice>, // 底层磁盘抽象层
    super_block: SuperBlock,      // 文件系统总体信息
    free_map: Arc<FreeMap>,       // 扇区分配信息
    registry: InodeRegistry,      // 已打开的 inode
}

impl FileSystem {
    /// 在设备上建一个空文件系统：超级块 + 空闲位图
    pub fn format(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let super_block = SuperBlock::new(device.sector_count());
        let free_map = FreeMap::new(super_block.sector_count);
        if super_block.reserved_sectors() >= super_block.sector_count {
            return Err(FsError::DiskFull);
        }
        free_map.reserve(SUPER_BLOCK_SECTOR, super_block.reserved_sectors());

        super_block.sync(device.as_ref())?;
        free_map.sync(device.as_ref(), super_block.free_map_start)?;
        info!(
            "formatted {} sectors ({} reserved)",
            super_block.sector_count,
            super_block.reserved_sectors()
        );
        Ok(Self::assemble(device, super_block, free_map))
    }

    /// 读取超级块和空闲位图
    pub fn mount(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let super_block = SuperBlock::load(device.as_ref())?;
        let free_map = FreeMap::load(
            device.as_ref(),
            super_block.free_map_start,
            super_block.sector_count,
        )?;
        for sector in SUPER_BLOCK_SECTOR..super_block.reserved_sectors() {
            if !free_map.is_used(sector) {
                return Err(FsError::Corrupted(format!(
                    "metadata sector {} is marked free",
                    sector
                )));
            }
        }
        info!(
            "mounted {}: {}/{} sectors used",
            super_block.fs_type,
            free_map.used(),
            super_block.sector_count
        );
        Ok(Self::assemble(device, super_block, free_map))
    }

    fn assemble(device: Arc<dyn BlockDevice>, super_block: SuperBlock, free_map: FreeMap) -> Self {
        let free_map = Arc::new(free_map);
        let registry = InodeRegistry::new(Arc::clone(&device), free_map.clone());
        Self {
            device,
            super_block,
            free_map,
            registry,
        }
    }

    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    pub fn registry(&self) -> &InodeRegistry {
        &self.registry
    }

    pub fn usage(&self) -> Usage {
        Usage {
            total: self.free_map.total(),
            used: self.free_map.used(),
            free: self.free_map.free_sectors(),
        }
    }

    /// 新建一个 `initial_size` 字节（内容全零）的文件，返回它的 inode 扇区号
    pub fn create(&self, initial_size: u32) -> Result<SectorId> {
        let sector = self.free_map.allocate(1).ok_or(FsError::DiskFull)?;
        if let Err(e) = self.registry.create(sector, initial_size) {
            self.free_map.release(sector, 1);
            return Err(e);
        }
        Ok(sector)
    }

    /// inode 只可能在已分配、且不属于元数据区的扇区上
    fn check_inode_sector(&self, sector: SectorId) -> Result<()> {
        if sector < self.super_block.reserved_sectors() || !self.free_map.is_used(sector) {
            return Err(FsError::InvalidInode(sector));
        }
        Ok(())
    }

    pub fn open(&self, sector: SectorId, mode: OpenMode) -> Result<File> {
        self.check_inode_sector(sector)?;
        let inode = self.registry.open(sector)?;
        Ok(File::new(inode, mode))
    }

    pub fn close(&self, file: File) -> Result<()> {
        self.registry.close(file.into_inode())
    }

    /// 删除文件。仍被打开时延迟到最后一次关闭才回收空间。
    pub fn remove(&self, sector: SectorId) -> Result<()> {
        self.check_inode_sector(sector)?;
        let inode = self.registry.open(sector)?;
        self.registry.remove(&inode);
        self.registry.close(inode)
    }

    /// 只读查询，不会写盘
    pub fn stat(&self, sector: SectorId) -> Result<InodeStat> {
        self.check_inode_sector(sector)?;
        let snap = self.registry.snapshot(sector)?;
        Ok(InodeStat {
            sector,
            length: snap.record.length,
            data_sectors: snap.record.data_sectors(),
            index_sectors: snap.record.index_sectors(),
            open_count: snap.open_count,
            removed: snap.removed,
        })
    }

    /// 写回所有打开的 inode、空闲位图和超级块
    pub fn sync(&self) -> Result<()> {
        self.registry.sync()?;
        self.free_map
            .sync(self.device.as_ref(), self.super_block.free_map_start)?;
        self.super_block.sync(self.device.as_ref())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{MemDisk, SECTOR_SIZE};

    #[test]
    fn format_reserves_metadata() {
        let disk = Arc::new(MemDisk::new(1024));
        let fs = FileSystem::format(disk).unwrap();
        // 1 个超级块 + 1 个位图扇区
        assert_eq!(
            fs.usage(),
            Usage {
                total: 1024,
                used: 2,
                free: 1022
            }
        );
    }

    #[test]
    fn tiny_device_cannot_be_formatted() {
        let disk = Arc::new(MemDisk::new(2));
        assert!(matches!(
            FileSystem::format(disk),
            Err(FsError::DiskFull)
        ));
    }

    #[test]
    fn remove_of_closed_file_reclaims_immediately() {
        let disk = Arc::new(MemDisk::new(1024));
        let fs = FileSystem::format(disk).unwrap();
        let before = fs.usage().used;
        let sector = fs.create(10 * SECTOR_SIZE as u32).unwrap();
        assert_eq!(fs.usage().used, before + 1 + 10 + 1);

        let stat = fs.stat(sector).unwrap();
        assert_eq!(stat.length, 10 * SECTOR_SIZE as u32);
        assert_eq!((stat.data_sectors, stat.index_sectors), (10, 1));
        assert_eq!(stat.open_count, 0);

        fs.remove(sector).unwrap();
        assert_eq!(fs.usage().used, before);
        assert!(matches!(
            fs.open(sector, OpenMode::READ),
            Err(FsError::InvalidInode(_))
        ));
    }

    #[test]
    fn free_reserved_and_out_of_range_sectors_are_not_inodes() {
        let disk = Arc::new(MemDisk::new(256));
        let fs = FileSystem::format(disk).unwrap();
        for sector in [0, 1, 100, 10_000] {
            assert!(matches!(fs.stat(sector), Err(FsError::InvalidInode(s)) if s == sector));
            assert!(matches!(
                fs.open(sector, OpenMode::READ),
                Err(FsError::InvalidInode(_))
            ));
            assert!(matches!(fs.remove(sector), Err(FsError::InvalidInode(_))));
        }
    }

    #[test]
    fn data_sector_with_forged_magic_is_rejected() {
        let disk = Arc::new(MemDisk::new(256));
        let fs = FileSystem::format(disk.clone()).unwrap();
        let victim = fs.create(0).unwrap();
        let mut file = fs.open(victim, OpenMode::READ | OpenMode::WRITE).unwrap();

        // 在数据扇区里伪造一个声称拥有 5 个扇区、长度却为 0 的记录
        let mut forged = FileRecord::new();
        forged.direct_index = 5;
        forged.block_pointers[..4].copy_from_slice(&[1, 2, 3, 4]);
        file.write(&forged.to_sector().unwrap()).unwrap();
        let data = file
            .inode()
            .record()
            .byte_to_sector(0, disk.as_ref())
            .unwrap()
            .unwrap();
        fs.close(file).unwrap();

        let used = fs.usage().used;
        assert!(matches!(fs.remove(data), Err(FsError::InvalidInode(_))));
        assert!(matches!(fs.stat(data), Err(FsError::InvalidInode(_))));
        assert_eq!(fs.usage().used, used);
    }

    #[test]
    fn stat_does_not_write() {
        let disk = Arc::new(MemDisk::new(256));
        let fs = FileSystem::format(disk.clone()).unwrap();
        let sector = fs.create(3 * SECTOR_SIZE as u32).unwrap();

        let writes = disk.writes();
        let stat = fs.stat(sector).unwrap();
        assert_eq!(stat.length, 3 * SECTOR_SIZE as u32);
        assert_eq!(disk.writes(), writes);

        let file = fs.open(sector, OpenMode::READ).unwrap();
        assert_eq!(fs.stat(sector).unwrap().open_count, 1);
        assert_eq!(disk.writes(), writes);
        fs.close(file).unwrap();
    }

    #[test]
    fn create_failure_returns_the_inode_sector() {
        let disk = Arc::new(MemDisk::new(64));
        let fs = FileSystem::format(disk).unwrap();
        let before = fs.usage().used;
        assert!(matches!(
            fs.create(1000 * SECTOR_SIZE as u32),
            Err(FsError::DiskFull)
        ));
        assert_eq!(fs.usage().used, before);
    }
}
