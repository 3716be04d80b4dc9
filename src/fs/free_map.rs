use std::sync::{Mutex, PoisonError};

use log::{debug, trace};

use crate::{
    disk::{BlockDevice, Sector, SectorId, SECTOR_SIZE},
    fs::error::{FsError, Result},
};

/// 扇区分配器：发放和回收扇区号
pub trait SectorAllocator: Send + Sync {
    /// 分配 `count` 个连续扇区，返回第一个扇区号；空间不足返回 None
    fn allocate(&self, count: usize) -> Option<SectorId>;
    /// 回收从 `start` 开始的 `count` 个扇区
    fn release(&self, start: SectorId, count: usize);
}

#[derive(Debug)]
struct Bitmap {
    bits: Vec<u8>,     // 位图数据，每个 bit 表示一个扇区是否被使用
    total_sectors: u32, // 扇区总数
    used_sectors: u32,  // 已使用的扇区数
}

impl Bitmap {
    fn is_used(&self, sector: u32) -> bool {
        self.bits[(sector / 8) as usize] & (1 << (sector % 8)) != 0
    }

    fn set(&mut self, sector: u32, used: bool) {
        let byte = &mut self.bits[(sector / 8) as usize];
        if used {
            *byte |= 1 << (sector % 8);
        } else {
            *byte &= !(1 << (sector % 8));
        }
    }

    // 首次适配：找第一段长度为 count 的连续空闲扇区
    fn find_run(&self, count: u32) -> Option<u32> {
        let mut start = 0;
        let mut len = 0;
        let mut sector = 0;
        while sector < self.total_sectors {
            // 整字节都被占用时直接跳过
            if len == 0 && sector % 8 == 0 && self.bits[(sector / 8) as usize] == 0xFF {
                sector += 8;
                continue;
            }
            if self.is_used(sector) {
                len = 0;
            } else {
                if len == 0 {
                    start = sector;
                }
                len += 1;
                if len == count {
                    return Some(start);
                }
            }
            sector += 1;
        }
        None
    }
}

/// 空闲扇区位图，覆盖整个设备
#[derive(Debug)]
pub struct FreeMap {
    inner: Mutex<Bitmap>,
}

impl FreeMap {
    pub fn new(total_sectors: u32) -> Self {
        let byte_len = total_sectors.div_ceil(8) as usize;
        Self {
            inner: Mutex::new(Bitmap {
                bits: vec![0; byte_len],
                total_sectors,
                used_sectors: 0,
            }),
        }
    }

    /// 位图本身在磁盘上占多少个扇区
    pub fn sectors_for(total_sectors: u32) -> u32 {
        total_sectors.div_ceil(8 * SECTOR_SIZE as u32)
    }

    /// 把元数据扇区（超级块、位图自身）标记为已用
    pub fn reserve(&self, start: SectorId, count: u32) {
        let mut map = self.lock();
        for sector in start..start + count {
            if !map.is_used(sector) {
                map.set(sector, true);
                map.used_sectors += 1;
            }
        }
    }

    pub fn is_used(&self, sector: SectorId) -> bool {
        let map = self.lock();
        sector < map.total_sectors && map.is_used(sector)
    }

    pub fn used(&self) -> u32 {
        self.lock().used_sectors
    }

    pub fn free_sectors(&self) -> u32 {
        let map = self.lock();
        map.total_sectors - map.used_sectors
    }

    pub fn total(&self) -> u32 {
        self.lock().total_sectors
    }

    // 从磁盘加载空闲位图
    pub fn load(device: &dyn BlockDevice, start: SectorId, total_sectors: u32) -> Result<Self> {
        let size_in_sectors = Self::sectors_for(total_sectors);
        let mut bits = Vec::with_capacity(size_in_sectors as usize * SECTOR_SIZE);
        let mut buf: Sector = [0; SECTOR_SIZE];

        for i in 0..size_in_sectors {
            device.read_block(start + i, &mut buf)?;
            bits.extend_from_slice(&buf);
        }

        // 截掉多余字节，只保留有效位
        bits.truncate(total_sectors.div_ceil(8) as usize);

        let used_sectors = bits.iter().map(|b| b.count_ones()).sum::<u32>();
        if used_sectors > total_sectors {
            return Err(FsError::Corrupted(format!(
                "free map claims {} used sectors on a {} sector device",
                used_sectors, total_sectors
            )));
        }
        debug!("free map loaded: {}/{} sectors used", used_sectors, total_sectors);

        Ok(Self {
            inner: Mutex::new(Bitmap {
                bits,
                total_sectors,
                used_sectors,
            }),
        })
    }

    // 将空闲位图写回磁盘，不足一个扇区的部分用 0 填充
    pub fn sync(&self, device: &dyn BlockDevice, start: SectorId) -> Result<()> {
        let map = self.lock();
        for (i, chunk) in map.bits.chunks(SECTOR_SIZE).enumerate() {
            let mut buf: Sector = [0; SECTOR_SIZE];
            buf[..chunk.len()].copy_from_slice(chunk);
            device.write_block(start + i as u32, &buf)?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bitmap> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SectorAllocator for FreeMap {
    fn allocate(&self, count: usize) -> Option<SectorId> {
        let count = u32::try_from(count).ok().filter(|&c| c > 0)?;
        let mut map = self.lock();
        let start = map.find_run(count)?;
        for sector in start..start + count {
            map.set(sector, true);
        }
        map.used_sectors += count;
        trace!("allocated sectors {}..{}", start, start + count);
        Some(start)
    }

    fn release(&self, start: SectorId, count: usize) {
        let mut map = self.lock();
        for sector in start..start + count as u32 {
            assert!(
                sector < map.total_sectors && map.is_used(sector),
                "releasing sector {} that is not allocated",
                sector
            );
            map.set(sector, false);
        }
        map.used_sectors -= count as u32;
        trace!("released sectors {}..{}", start, start + count as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;

    #[test]
    fn allocates_first_free_contiguous_run() {
        let map = FreeMap::new(64);
        map.reserve(0, 2);
        assert_eq!(map.allocate(1), Some(2));
        assert_eq!(map.allocate(3), Some(3));
        map.release(3, 1);
        // 3 号空出来了，但放不下两个连续扇区
        assert_eq!(map.allocate(2), Some(6));
        assert_eq!(map.allocate(1), Some(3));
        assert_eq!(map.used(), 2 + 1 + 3 + 2);
    }

    #[test]
    fn exhaustion_returns_none() {
        let map = FreeMap::new(10);
        assert_eq!(map.allocate(10), Some(0));
        assert_eq!(map.allocate(1), None);
        assert_eq!(map.free_sectors(), 0);
        map.release(4, 1);
        assert_eq!(map.allocate(1), Some(4));
        assert_eq!(map.allocate(0), None);
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn double_release_panics() {
        let map = FreeMap::new(16);
        let s = map.allocate(1).unwrap();
        map.release(s, 1);
        map.release(s, 1);
    }

    #[test]
    fn sync_then_load_preserves_bits() {
        let total = 5000; // 需要两个扇区的位图
        let disk = MemDisk::new(total);
        let map = FreeMap::new(total);
        map.reserve(0, 1 + FreeMap::sectors_for(total));
        map.allocate(100).unwrap();
        let far = map.allocate(4200).unwrap();
        map.release(far + 10, 5);
        map.sync(&disk, 1).unwrap();

        let loaded = FreeMap::load(&disk, 1, total).unwrap();
        assert_eq!(loaded.used(), map.used());
        assert!(loaded.is_used(far + 9));
        assert!(!loaded.is_used(far + 10));
        assert!(loaded.is_used(far + 15));
    }
}
