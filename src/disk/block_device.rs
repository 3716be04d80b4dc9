use std::io::Result;

use crate::disk::types::{Sector, SectorId};

/// 块设备抽象：以整个扇区为单位读写。
/// 同一扇区上的单次读写必须是原子的。
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, sector: SectorId, buf: &mut Sector) -> Result<()>;
    fn write_block(&self, sector: SectorId, buf: &Sector) -> Result<()>;
    fn sector_count(&self) -> u32;
}
