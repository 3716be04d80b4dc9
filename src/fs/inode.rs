//! 内存中的 inode：打开计数、删除标记、禁写计数，以及记录的缓存副本。
//!
//! 扩容和回收都在 `state` 锁内完成；读写数据扇区时只拿一份记录快照，
//! 已分配的扇区在最后一次 close 之前不会被回收，所以快照一直有效。

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{debug, trace};

use crate::{
    disk::{BlockDevice, Sector, SectorId, SECTOR_SIZE},
    fs::{error::Result, free_map::SectorAllocator, record::FileRecord},
};

#[derive(Debug)]
pub(crate) struct InodeState {
    pub(crate) open_count: u32,
    pub(crate) removed: bool,
    pub(crate) deny_write_count: u32,
    pub(crate) record: FileRecord,
}

pub struct Inode {
    sector: SectorId,
    device: Arc<dyn BlockDevice>,
    allocator: Arc<dyn SectorAllocator>,
    state: Mutex<InodeState>,
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("sector", &self.sector)
            .field("state", &*self.lock())
            .finish()
    }
}

impl Inode {
    pub(crate) fn new(
        sector: SectorId,
        record: FileRecord,
        device: Arc<dyn BlockDevice>,
        allocator: Arc<dyn SectorAllocator>,
    ) -> Self {
        Self {
            sector,
            device,
            allocator,
            state: Mutex::new(InodeState {
                open_count: 1,
                removed: false,
                deny_write_count: 0,
                record,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, InodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// inode 所在扇区，也就是 inode 编号
    pub fn sector(&self) -> SectorId {
        self.sector
    }

    pub fn length(&self) -> u32 {
        self.lock().record.length
    }

    pub fn open_count(&self) -> u32 {
        self.lock().open_count
    }

    pub fn is_removed(&self) -> bool {
        self.lock().removed
    }

    pub fn is_write_denied(&self) -> bool {
        self.lock().deny_write_count > 0
    }

    /// 当前记录的快照
    pub fn record(&self) -> FileRecord {
        self.lock().record
    }

    /// 标记删除，真正的回收推迟到最后一次 close
    pub fn mark_removed(&self) {
        self.lock().removed = true;
    }

    /// 禁止写入（文件正作为可执行映像运行时）。每个打开者最多调用一次。
    pub fn deny_write(&self) {
        let mut state = self.lock();
        state.deny_write_count += 1;
        assert!(
            state.deny_write_count <= state.open_count,
            "inode {}: deny_write count {} exceeds open count {}",
            self.sector,
            state.deny_write_count,
            state.open_count
        );
    }

    /// 恢复写入，必须和之前的 deny_write 一一对应
    pub fn allow_write(&self) {
        let mut state = self.lock();
        assert!(
            state.deny_write_count > 0,
            "inode {}: allow_write without a matching deny_write",
            self.sector
        );
        assert!(state.deny_write_count <= state.open_count);
        state.deny_write_count -= 1;
    }

    /// 把缓存的记录写回 inode 扇区
    pub fn persist(&self) -> Result<()> {
        let record = self.lock().record;
        record.store(self.device.as_ref(), self.sector)
    }

    /// 从 `offset` 开始读到 `buf`，返回实际读到的字节数。
    /// 到达文件末尾时少于 `buf.len()`，这不是错误。
    pub fn read_at(&self, buf: &mut [u8], offset: u32) -> Result<usize> {
        let record = self.record();
        let mut bounce: Sector = [0; SECTOR_SIZE];
        let mut done = 0;

        while done < buf.len() {
            let Some(pos) = offset.checked_add(done as u32) else {
                break;
            };
            let Some(sector) = record.byte_to_sector(pos, self.device.as_ref())? else {
                break;
            };

            // 文件剩余、扇区剩余、请求剩余，取最小
            let sector_ofs = pos as usize % SECTOR_SIZE;
            let inode_left = (record.length - pos) as usize;
            let sector_left = SECTOR_SIZE - sector_ofs;
            let chunk = (buf.len() - done).min(inode_left).min(sector_left);

            let whole = if sector_ofs == 0 && chunk == SECTOR_SIZE {
                buf[done..].first_chunk_mut::<SECTOR_SIZE>()
            } else {
                None
            };
            match whole {
                // 整扇区直接读进调用方缓冲区
                Some(dst) => self.device.read_block(sector, dst)?,
                None => {
                    self.device.read_block(sector, &mut bounce)?;
                    buf[done..done + chunk]
                        .copy_from_slice(&bounce[sector_ofs..sector_ofs + chunk]);
                }
            }
            done += chunk;
        }

        trace!("inode {}: read {} bytes at {}", self.sector, done, offset);
        Ok(done)
    }

    /// 从 `offset` 开始写入 `buf`，必要时先扩容，返回实际写入的字节数。
    /// 禁写期间返回 0；磁盘空间不足时只写入有扇区支撑的部分。
    pub fn write_at(&self, buf: &[u8], offset: u32) -> Result<usize> {
        let record = {
            let mut state = self.lock();
            if state.deny_write_count > 0 {
                return Ok(0);
            }

            let end = (offset as u64 + buf.len() as u64).min(u32::MAX as u64) as u32;
            if end > state.record.length {
                let before = state.record.length;
                let achieved =
                    state
                        .record
                        .grow(end, self.device.as_ref(), self.allocator.as_ref())?;
                if achieved != before {
                    state.record.store(self.device.as_ref(), self.sector)?;
                    debug!("inode {}: length {} -> {}", self.sector, before, achieved);
                }
            }
            state.record
        };

        let mut bounce: Sector = [0; SECTOR_SIZE];
        let mut done = 0;

        while done < buf.len() {
            let Some(pos) = offset.checked_add(done as u32) else {
                break;
            };
            let Some(sector) = record.byte_to_sector(pos, self.device.as_ref())? else {
                break;
            };

            let sector_ofs = pos as usize % SECTOR_SIZE;
            let inode_left = (record.length - pos) as usize;
            let sector_left = SECTOR_SIZE - sector_ofs;
            let chunk = (buf.len() - done).min(inode_left).min(sector_left);

            match buf[done..].first_chunk::<SECTOR_SIZE>() {
                // 整扇区直接写
                Some(src) if sector_ofs == 0 && chunk == SECTOR_SIZE => {
                    self.device.write_block(sector, src)?
                }
                _ => {
                    // 扇区里块前或块后还有别的数据，才需要先读出原内容
                    if sector_ofs > 0 || chunk < sector_left {
                        self.device.read_block(sector, &mut bounce)?;
                    } else {
                        bounce.fill(0);
                    }
                    bounce[sector_ofs..sector_ofs + chunk]
                        .copy_from_slice(&buf[done..done + chunk]);
                    self.device.write_block(sector, &bounce)?;
                }
            }
            done += chunk;
        }

        trace!("inode {}: wrote {} bytes at {}", self.sector, done, offset);
        Ok(done)
    }
}
