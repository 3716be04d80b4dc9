use std::mem::size_of;

use crate::disk::{SectorId, SECTOR_SIZE};

pub const SUPER_BLOCK_SECTOR: SectorId = 0;
pub const FREE_MAP_START_SECTOR: SectorId = 1;

/// 0 号扇区永远是超级块，不会被分配出去，所以 0 可以表示“未分配”
pub const NO_SECTOR: SectorId = 0;

/// inode 魔数 "INOD"
pub const INODE_MAGIC: u32 = 0x494e_4f44;

/// 文件系统魔数
pub const FS_MAGIC: u64 = 0x4752_4f57_4653_0001;

// 块指针布局：4 个直接 + 9 个一级间接 + 1 个二级间接
pub const DIRECT_PTRS: usize = 4;
pub const INDIRECT_PTRS: usize = 9;
pub const BLOCK_PTRS: usize = DIRECT_PTRS + INDIRECT_PTRS + 1;
pub const DOUBLE_INDIRECT_SLOT: usize = DIRECT_PTRS + INDIRECT_PTRS;

/// 每个索引扇区能放多少个扇区号：512 / 4 = 128
pub const FANOUT: usize = SECTOR_SIZE / size_of::<SectorId>();

// 一个文件最多占用的数据扇区数：4 + 9*128 + 128*128 = 17540
pub const MAX_FILE_SECTORS: usize = DIRECT_PTRS + INDIRECT_PTRS * FANOUT + FANOUT * FANOUT;

pub const MAX_FILE_SIZE: u32 = (MAX_FILE_SECTORS * SECTOR_SIZE) as u32;

/// 一个 `size` 字节的文件需要多少个数据扇区
pub fn bytes_to_sectors(size: u32) -> usize {
    (size as usize).div_ceil(SECTOR_SIZE)
}
