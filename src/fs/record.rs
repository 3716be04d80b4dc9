//! 磁盘上的 inode 记录（FileRecord），正好占一个扇区。
//!
//! 块指针数组的布局：
//!
//! ```text
//! block_pointers[0..4]   直接指针 -> 数据扇区
//! block_pointers[4..13]  一级间接 -> 索引扇区(128 个指针) -> 数据扇区
//! block_pointers[13]     二级间接 -> 外层索引扇区 -> 内层索引扇区 -> 数据扇区
//! ```
//!
//! 三个游标记录“已经分配到哪里”，只会前进：
//!
//! - `direct_index`：当前正在填充的指针槽位，`< 4` 表示还在直接区，
//!   `4..13` 表示在一级间接区，`== 13` 表示进入二级间接区
//! - `indirect_index`：一级间接区里是当前索引扇区已填的叶子数；
//!   二级间接区里是外层索引已填满的内层扇区数
//! - `double_indirect_index`：二级间接区当前内层索引扇区已填的叶子数
//!
//! 索引扇区只有在至少挂了一个叶子时才存在，所以已分配的数据扇区和
//! 索引扇区数量都能只靠游标算出来，不需要扫描磁盘。

use serde::{Deserialize, Serialize};

use crate::{
    disk::{BlockDevice, Sector, SectorId, SECTOR_SIZE},
    fs::{
        config::{
            bytes_to_sectors, BLOCK_PTRS, DIRECT_PTRS, DOUBLE_INDIRECT_SLOT, FANOUT, INDIRECT_PTRS, INODE_MAGIC,
            NO_SECTOR,
        },
        error::Result,
    },
};

/// bincode 定长编码后的字节数：5 个 u32 字段 + 指针数组
pub const RECORD_SIZE: usize = 4 * 5 + 4 * BLOCK_PTRS;

const _: () = assert!(RECORD_SIZE <= SECTOR_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub length: u32, // 文件大小（字节）
    pub magic: u32,
    pub direct_index: u32,
    pub indirect_index: u32,
    pub double_indirect_index: u32,
    pub block_pointers: [SectorId; BLOCK_PTRS],
}

impl Default for FileRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl FileRecord {
    /// 长度为 0 的空记录
    pub fn new() -> Self {
        Self {
            length: 0,
            magic: INODE_MAGIC,
            direct_index: 0,
            indirect_index: 0,
            double_indirect_index: 0,
            block_pointers: [NO_SECTOR; BLOCK_PTRS],
        }
    }

    /// 魔数正确、游标组合合法，并且游标算出的数据扇区数和 `length` 一致
    pub fn is_valid(&self) -> bool {
        let slot = self.direct_index as usize;
        let outer = self.indirect_index as usize;
        let inner = self.double_indirect_index as usize;

        let cursors_ok = if slot < DIRECT_PTRS {
            outer == 0 && inner == 0
        } else if slot < DOUBLE_INDIRECT_SLOT {
            outer < FANOUT && inner == 0
        } else if slot == DOUBLE_INDIRECT_SLOT {
            // 二级间接全满时外层游标停在 FANOUT
            (outer < FANOUT && inner < FANOUT) || (outer == FANOUT && inner == 0)
        } else {
            false
        };

        self.magic == INODE_MAGIC
            && cursors_ok
            && self.data_sectors() == bytes_to_sectors(self.length)
    }

    /// 编码成一个完整扇区，记录之后的部分是保留的零填充
    pub fn to_sector(&self) -> Result<Sector> {
        let mut buf: Sector = [0; SECTOR_SIZE];
        bincode::serialize_into(&mut buf[..RECORD_SIZE], self)?;
        Ok(buf)
    }

    pub fn from_sector(buf: &Sector) -> Result<Self> {
        Ok(bincode::deserialize(&buf[..RECORD_SIZE])?)
    }

    pub fn load(device: &dyn BlockDevice, sector: SectorId) -> Result<Self> {
        let mut buf: Sector = [0; SECTOR_SIZE];
        device.read_block(sector, &mut buf)?;
        Self::from_sector(&buf)
    }

    pub fn store(&self, device: &dyn BlockDevice, sector: SectorId) -> Result<()> {
        device.write_block(sector, &self.to_sector()?)?;
        Ok(())
    }

    /// 游标表示的已分配数据扇区数
    pub fn data_sectors(&self) -> usize {
        let slot = self.direct_index as usize;
        let outer = self.indirect_index as usize;
        let inner = self.double_indirect_index as usize;

        if slot < DIRECT_PTRS {
            slot
        } else if slot < DOUBLE_INDIRECT_SLOT {
            DIRECT_PTRS + (slot - DIRECT_PTRS) * FANOUT + outer
        } else {
            DIRECT_PTRS + INDIRECT_PTRS * FANOUT + outer * FANOUT + inner
        }
    }

    /// 游标表示的已分配索引扇区数（一级间接块、二级的内外层块）
    pub fn index_sectors(&self) -> usize {
        let slot = self.direct_index as usize;
        let outer = self.indirect_index as usize;
        let inner = self.double_indirect_index as usize;

        if slot < DIRECT_PTRS {
            0
        } else if slot < DOUBLE_INDIRECT_SLOT {
            (slot - DIRECT_PTRS) + usize::from(outer > 0)
        } else if outer == 0 && inner == 0 {
            INDIRECT_PTRS
        } else {
            INDIRECT_PTRS + 1 + outer + usize::from(inner > 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;

    #[test]
    fn encodes_to_exactly_one_sector() {
        let mut record = FileRecord::new();
        record.length = 70_000;
        record.direct_index = 5;
        record.indirect_index = 17;
        record.block_pointers[0] = 42;
        record.block_pointers[BLOCK_PTRS - 1] = 0xDEAD_BEEF;

        let bytes = bincode::serialize(&record).unwrap();
        assert_eq!(bytes.len(), RECORD_SIZE);

        let sector = record.to_sector().unwrap();
        assert_eq!(sector.len(), SECTOR_SIZE);
        assert!(sector[RECORD_SIZE..].iter().all(|&b| b == 0));
        // 小端定长布局：length 在最前面，magic 紧随其后
        assert_eq!(&sector[..4], &70_000u32.to_le_bytes());
        assert_eq!(&sector[4..8], &INODE_MAGIC.to_le_bytes());

        assert_eq!(FileRecord::from_sector(&sector).unwrap(), record);
    }

    #[test]
    fn store_and_load_through_device() {
        let disk = MemDisk::new(4);
        let mut record = FileRecord::new();
        record.length = 9;
        record.direct_index = 1;
        record.block_pointers[0] = 3;
        record.store(&disk, 2).unwrap();
        let loaded = FileRecord::load(&disk, 2).unwrap();
        assert!(loaded.is_valid());
        assert_eq!(loaded, record);

        assert!(!FileRecord::load(&disk, 1).unwrap().is_valid());
    }

    #[test]
    fn forged_or_inconsistent_records_are_invalid() {
        let mut r = FileRecord::new();
        assert!(r.is_valid());

        // 有魔数但长度和游标对不上
        r.length = 10 * SECTOR_SIZE as u32;
        assert!(!r.is_valid());
        r.direct_index = DIRECT_PTRS as u32;
        r.indirect_index = 6;
        assert!(r.is_valid());

        // 直接区还没满时不能有间接游标
        r.direct_index = 2;
        r.indirect_index = 8;
        assert!(!r.is_valid());

        // 一级间接区的叶子游标不能到 FANOUT
        r.direct_index = DIRECT_PTRS as u32;
        r.indirect_index = FANOUT as u32;
        r.length = (DIRECT_PTRS + FANOUT) as u32 * SECTOR_SIZE as u32;
        assert!(!r.is_valid());

        // 最大文件：外层游标停在 FANOUT
        r.direct_index = DOUBLE_INDIRECT_SLOT as u32;
        r.indirect_index = FANOUT as u32;
        r.double_indirect_index = 0;
        r.length = (crate::fs::config::MAX_FILE_SECTORS * SECTOR_SIZE) as u32;
        assert!(r.is_valid());
        r.double_indirect_index = 1;
        assert!(!r.is_valid());

        r = FileRecord::new();
        r.direct_index = DOUBLE_INDIRECT_SLOT as u32 + 1;
        assert!(!r.is_valid());
    }

    #[test]
    fn cursor_arithmetic_covers_every_region() {
        let mut r = FileRecord::new();
        assert_eq!((r.data_sectors(), r.index_sectors()), (0, 0));

        r.direct_index = 3;
        assert_eq!((r.data_sectors(), r.index_sectors()), (3, 0));

        // 第一个一级间接块里挂了 10 个叶子
        r.direct_index = DIRECT_PTRS as u32;
        r.indirect_index = 10;
        assert_eq!((r.data_sectors(), r.index_sectors()), (14, 1));

        // 两个一级间接块已满，第三个还没分配
        r.direct_index = DIRECT_PTRS as u32 + 2;
        r.indirect_index = 0;
        assert_eq!((r.data_sectors(), r.index_sectors()), (4 + 256, 2));

        // 一级间接全满，二级还没开始
        r.direct_index = DOUBLE_INDIRECT_SLOT as u32;
        assert_eq!(
            (r.data_sectors(), r.index_sectors()),
            (4 + 9 * 128, INDIRECT_PTRS)
        );

        // 二级间接：一个内层块已满，第二个内层块挂了 3 个叶子
        r.indirect_index = 1;
        r.double_indirect_index = 3;
        assert_eq!(
            (r.data_sectors(), r.index_sectors()),
            (4 + 9 * 128 + 128 + 3, INDIRECT_PTRS + 1 + 2)
        );
    }
}
