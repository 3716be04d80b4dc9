//! 多级索引：扩容（grow）、偏移到扇区的翻译（byte_to_sector）、回收（free）。
//!
//! 这里的函数都会修改 [`FileRecord`] 的游标，调用方必须持有该记录的独占锁。

use log::{debug, trace, warn};

use crate::{
    disk::{BlockDevice, Sector, SectorId, SECTOR_SIZE, ZERO_SECTOR},
    fs::{
        config::{
            bytes_to_sectors, DIRECT_PTRS, DOUBLE_INDIRECT_SLOT, FANOUT, INDIRECT_PTRS,
            MAX_FILE_SECTORS, NO_SECTOR,
        },
        error::Result,
        free_map::SectorAllocator,
        record::FileRecord,
    },
};

/// 索引扇区：FANOUT 个扇区号，一级间接块和二级间接的内外层块都用它
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBlock([SectorId; FANOUT]);

impl IndexBlock {
    pub fn empty() -> Self {
        Self([NO_SECTOR; FANOUT])
    }

    pub fn get(&self, slot: usize) -> SectorId {
        self.0[slot]
    }

    pub fn set(&mut self, slot: usize, sector: SectorId) {
        self.0[slot] = sector;
    }

    pub fn load(device: &dyn BlockDevice, sector: SectorId) -> Result<Self> {
        let mut buf: Sector = [0; SECTOR_SIZE];
        device.read_block(sector, &mut buf)?;
        let mut block = Self::empty();
        for (slot, raw) in block.0.iter_mut().zip(buf.chunks_exact(4)) {
            *slot = SectorId::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        }
        Ok(block)
    }

    pub fn store(&self, device: &dyn BlockDevice, sector: SectorId) -> Result<()> {
        let mut buf: Sector = [0; SECTOR_SIZE];
        for (raw, slot) in buf.chunks_exact_mut(4).zip(self.0.iter()) {
            raw.copy_from_slice(&slot.to_le_bytes());
        }
        device.write_block(sector, &buf)?;
        Ok(())
    }
}

/// 一次扩容过程中的状态
struct Grower<'a> {
    device: &'a dyn BlockDevice,
    allocator: &'a dyn SectorAllocator,
    remaining: usize,     // 还需要分配的数据扇区数
    exhausted: bool,      // 分配器已经给不出扇区
    taken: Vec<SectorId>, // 本次扩容拿到的扇区，出错时全部退回
}

impl Grower<'_> {
    fn wants_more(&self) -> bool {
        self.remaining > 0 && !self.exhausted
    }

    // 拿一个扇区，不清零（索引块随后会整体写入）
    fn take(&mut self) -> Option<SectorId> {
        let sector = self.allocator.allocate(1);
        match sector {
            Some(sector) => self.taken.push(sector),
            None => self.exhausted = true,
        }
        sector
    }

    // 退回一个刚拿到、最终没用上的扇区
    fn give_back(&mut self, sector: SectorId) {
        if let Some(at) = self.taken.iter().rposition(|&s| s == sector) {
            self.taken.swap_remove(at);
        }
        self.allocator.release(sector, 1);
    }

    // I/O 出错：本次拿到的扇区全部退回
    fn abort(self) {
        for &sector in &self.taken {
            self.allocator.release(sector, 1);
        }
    }

    // 拿一个数据扇区并清零
    fn zeroed(&mut self) -> Result<Option<SectorId>> {
        match self.take() {
            Some(sector) => {
                self.device.write_block(sector, &ZERO_SECTOR)?;
                Ok(Some(sector))
            }
            None => Ok(None),
        }
    }

    // 往索引块里挂叶子，直到块满、需求满足或空间耗尽，返回挂上的个数
    fn fill_leaves(&mut self, block: &mut IndexBlock, cursor: &mut u32) -> Result<usize> {
        let mut filled = 0;
        while self.wants_more() && (*cursor as usize) < FANOUT {
            let Some(sector) = self.zeroed()? else { break };
            block.set(*cursor as usize, sector);
            *cursor += 1;
            self.remaining -= 1;
            filled += 1;
        }
        Ok(filled)
    }

    fn direct(&mut self, record: &mut FileRecord) -> Result<()> {
        while self.wants_more() && (record.direct_index as usize) < DIRECT_PTRS {
            let Some(sector) = self.zeroed()? else { break };
            record.block_pointers[record.direct_index as usize] = sector;
            record.direct_index += 1;
            self.remaining -= 1;
        }
        Ok(())
    }

    fn indirect(&mut self, record: &mut FileRecord) -> Result<()> {
        while self.wants_more() && (record.direct_index as usize) < DOUBLE_INDIRECT_SLOT {
            let slot = record.direct_index as usize;
            let fresh = record.indirect_index == 0;
            let mut block = if fresh {
                let Some(sector) = self.take() else { break };
                record.block_pointers[slot] = sector;
                IndexBlock::empty()
            } else {
                IndexBlock::load(self.device, record.block_pointers[slot])?
            };

            let filled = self.fill_leaves(&mut block, &mut record.indirect_index)?;
            if fresh && filled == 0 {
                // 新索引块一个叶子都没挂上，退回去
                self.give_back(record.block_pointers[slot]);
                record.block_pointers[slot] = NO_SECTOR;
                break;
            }
            block.store(self.device, record.block_pointers[slot])?;

            if record.indirect_index as usize == FANOUT {
                record.indirect_index = 0;
                record.direct_index += 1;
            }
        }
        Ok(())
    }

    fn double_indirect(&mut self, record: &mut FileRecord) -> Result<()> {
        if !self.wants_more() || record.direct_index as usize != DOUBLE_INDIRECT_SLOT {
            return Ok(());
        }

        let outer_fresh = record.indirect_index == 0 && record.double_indirect_index == 0;
        let mut outer = if outer_fresh {
            let Some(sector) = self.take() else {
                return Ok(());
            };
            record.block_pointers[DOUBLE_INDIRECT_SLOT] = sector;
            IndexBlock::empty()
        } else {
            IndexBlock::load(self.device, record.block_pointers[DOUBLE_INDIRECT_SLOT])?
        };

        while self.wants_more() && (record.indirect_index as usize) < FANOUT {
            let slot = record.indirect_index as usize;
            let inner_fresh = record.double_indirect_index == 0;
            let mut inner = if inner_fresh {
                let Some(sector) = self.take() else { break };
                outer.set(slot, sector);
                IndexBlock::empty()
            } else {
                IndexBlock::load(self.device, outer.get(slot))?
            };

            let filled = self.fill_leaves(&mut inner, &mut record.double_indirect_index)?;
            if inner_fresh && filled == 0 {
                self.give_back(outer.get(slot));
                outer.set(slot, NO_SECTOR);
                break;
            }
            inner.store(self.device, outer.get(slot))?;

            if record.double_indirect_index as usize == FANOUT {
                record.double_indirect_index = 0;
                record.indirect_index += 1;
            }
        }

        if outer_fresh && record.indirect_index == 0 && record.double_indirect_index == 0 {
            self.give_back(record.block_pointers[DOUBLE_INDIRECT_SLOT]);
            record.block_pointers[DOUBLE_INDIRECT_SLOT] = NO_SECTOR;
            return Ok(());
        }
        outer.store(self.device, record.block_pointers[DOUBLE_INDIRECT_SLOT])
    }
}

impl FileRecord {
    /// 把文件扩展到 `new_length` 字节，返回实际达到的长度（同时写回 `self.length`）。
    ///
    /// 从游标处继续分配，所以重复调用或者失败后再调用都不会重复分配。
    /// 分配器耗尽或超过最大文件大小时停在已经有扇区支撑的长度上，
    /// 这不算错误；只有底层 I/O 失败才返回 `Err`，此时本次分配的扇区
    /// 全部退回，记录恢复成调用前的样子。
    pub fn grow(
        &mut self,
        new_length: u32,
        device: &dyn BlockDevice,
        allocator: &dyn SectorAllocator,
    ) -> Result<u32> {
        if new_length <= self.length {
            return Ok(self.length);
        }

        let wanted = bytes_to_sectors(new_length);
        let target = wanted.min(MAX_FILE_SECTORS);
        let mut grower = Grower {
            device,
            allocator,
            remaining: target.saturating_sub(self.data_sectors()),
            exhausted: false,
            taken: Vec::new(),
        };

        if grower.remaining > 0 {
            debug!(
                "growing file from {} to {} bytes: {} new data sectors",
                self.length, new_length, grower.remaining
            );
            let before = *self;
            let phases = grower
                .direct(self)
                .and_then(|_| grower.indirect(self))
                .and_then(|_| grower.double_indirect(self));
            if let Err(e) = phases {
                // 游标之外的旧指针不会被读到，磁盘上的索引块不用恢复
                warn!("growth to {} bytes failed, rolling back: {}", new_length, e);
                grower.abort();
                *self = before;
                return Err(e);
            }
        }

        let achieved = if grower.remaining == 0 && target == wanted {
            new_length
        } else {
            let backed = (self.data_sectors() * SECTOR_SIZE) as u32;
            warn!(
                "growth to {} bytes stopped at {} bytes ({} sectors short)",
                new_length,
                backed,
                wanted - self.data_sectors()
            );
            backed
        };
        self.length = self.length.max(achieved);
        Ok(self.length)
    }

    /// 返回包含字节偏移 `pos` 的数据扇区；`pos` 不在文件内时返回 None
    pub fn byte_to_sector(&self, pos: u32, device: &dyn BlockDevice) -> Result<Option<SectorId>> {
        if pos >= self.length {
            return Ok(None);
        }

        let index = pos as usize / SECTOR_SIZE;
        let sector = if index < DIRECT_PTRS {
            self.block_pointers[index]
        } else if index < DIRECT_PTRS + INDIRECT_PTRS * FANOUT {
            let index = index - DIRECT_PTRS;
            let block = IndexBlock::load(device, self.block_pointers[DIRECT_PTRS + index / FANOUT])?;
            block.get(index % FANOUT)
        } else {
            let index = index - DIRECT_PTRS - INDIRECT_PTRS * FANOUT;
            let outer = IndexBlock::load(device, self.block_pointers[DOUBLE_INDIRECT_SLOT])?;
            let inner = IndexBlock::load(device, outer.get(index / FANOUT))?;
            inner.get(index % FANOUT)
        };
        trace!("byte {} -> sector {}", pos, sector);
        Ok(Some(sector))
    }

    /// 回收文件拥有的所有扇区（数据扇区和索引扇区），返回回收的个数，
    /// 之后记录被重置为空文件。只按游标回收，不会扫描游标之外的槽位。
    pub fn free(
        &mut self,
        device: &dyn BlockDevice,
        allocator: &dyn SectorAllocator,
    ) -> Result<usize> {
        debug_assert_eq!(self.data_sectors(), bytes_to_sectors(self.length));

        let slot = self.direct_index as usize;
        let outer_cursor = self.indirect_index as usize;
        let inner_cursor = self.double_indirect_index as usize;
        let mut released = 0;
        let mut release = |sector: SectorId| {
            allocator.release(sector, 1);
            released += 1;
        };

        for &sector in &self.block_pointers[..slot.min(DIRECT_PTRS)] {
            release(sector);
        }

        // 已经填满的一级间接块
        let full_indirect = slot.clamp(DIRECT_PTRS, DOUBLE_INDIRECT_SLOT) - DIRECT_PTRS;
        for &root in &self.block_pointers[DIRECT_PTRS..DIRECT_PTRS + full_indirect] {
            let block = IndexBlock::load(device, root)?;
            block.0.iter().for_each(|&leaf| release(leaf));
            release(root);
        }

        // 正在填充的一级间接块
        if (DIRECT_PTRS..DOUBLE_INDIRECT_SLOT).contains(&slot) && outer_cursor > 0 {
            let root = self.block_pointers[slot];
            let block = IndexBlock::load(device, root)?;
            block.0[..outer_cursor].iter().for_each(|&leaf| release(leaf));
            release(root);
        }

        if slot == DOUBLE_INDIRECT_SLOT && (outer_cursor > 0 || inner_cursor > 0) {
            let root = self.block_pointers[DOUBLE_INDIRECT_SLOT];
            let outer = IndexBlock::load(device, root)?;
            for &inner_root in &outer.0[..outer_cursor] {
                let inner = IndexBlock::load(device, inner_root)?;
                inner.0.iter().for_each(|&leaf| release(leaf));
                release(inner_root);
            }
            if inner_cursor > 0 {
                let inner_root = outer.get(outer_cursor);
                let inner = IndexBlock::load(device, inner_root)?;
                inner.0[..inner_cursor].iter().for_each(|&leaf| release(leaf));
                release(inner_root);
            }
            release(root);
        }

        debug!("freed {} sectors of a {} byte file", released, self.length);
        *self = FileRecord::new();
        Ok(released)
    }
}
