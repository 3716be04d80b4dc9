//! GrowFS：可增长文件的块映射引擎。
//!
//! - `disk`：块设备抽象（镜像文件 / 内存盘）
//! - `fs`：空闲位图、超级块、多级索引的 inode 记录、已打开 inode 表和文件句柄

pub mod disk;
pub mod fs;
pub mod utils;

pub use disk::{BlockDevice, FileDisk, MemDisk, SectorId, SECTOR_SIZE};
pub use fs::{
    error::{FsError, Result},
    File, FileSystem, FileTable, OpenMode,
};
