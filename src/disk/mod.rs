pub mod block_device;
pub mod file_disk;
pub mod mem_disk;
pub mod types;

pub use block_device::BlockDevice;
pub use file_disk::FileDisk;
pub use mem_disk::MemDisk;
pub use types::{Sector, SectorId, DEFAULT_SECTOR_COUNT, SECTOR_SIZE, ZERO_SECTOR};

use std::io::{Error, ErrorKind};

/// 越界扇区号统一报 InvalidInput
pub(crate) fn out_of_range(sector: SectorId, count: u32) -> Error {
    Error::new(
        ErrorKind::InvalidInput,
        format!("sector {} out of range (device has {} sectors)", sector, count),
    )
}
