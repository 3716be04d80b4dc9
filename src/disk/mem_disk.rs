use std::{
    io::Result,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, PoisonError,
    },
};

use crate::disk::{
    block_device::BlockDevice,
    out_of_range,
    types::{Sector, SectorId, SECTOR_SIZE},
};

/// 内存中的虚拟磁盘，测试和 `--memory` 模式使用。
/// 会统计读写次数，方便观察写路径是否做了多余的读。
#[derive(Debug)]
pub struct MemDisk {
    sectors: Mutex<Vec<Sector>>,
    count: u32,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemDisk {
    pub fn new(count: u32) -> Self {
        Self {
            sectors: Mutex::new(vec![[0u8; SECTOR_SIZE]; count as usize]),
            count,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, sector: SectorId, buf: &mut Sector) -> Result<()> {
        let sectors = self.sectors.lock().unwrap_or_else(PoisonError::into_inner);
        let src = sectors
            .get(sector as usize)
            .ok_or_else(|| out_of_range(sector, self.count))?;
        buf.copy_from_slice(src);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_block(&self, sector: SectorId, buf: &Sector) -> Result<()> {
        let mut sectors = self.sectors.lock().unwrap_or_else(PoisonError::into_inner);
        let dst = sectors
            .get_mut(sector as usize)
            .ok_or_else(|| out_of_range(sector, self.count))?;
        dst.copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn sector_count(&self) -> u32 {
        self.count
    }
}
