use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{debug, info};

use crate::{
    disk::{BlockDevice, SectorId, ZERO_SECTOR},
    fs::{
        error::{FsError, Result},
        free_map::SectorAllocator,
        inode::Inode,
        record::FileRecord,
    },
};

/// [`InodeRegistry::snapshot`] 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeSnapshot {
    pub record: FileRecord,
    pub open_count: u32,
    pub removed: bool,
}

/// 已打开 inode 表：同一个扇区同时最多只有一个 [`Inode`]，
/// 用引用计数管理生命周期，被删除的 inode 等最后一个打开者关闭时才回收。
pub struct InodeRegistry {
    device: Arc<dyn BlockDevice>,
    allocator: Arc<dyn SectorAllocator>,
    open_inodes: Mutex<HashMap<SectorId, Arc<Inode>>>, // 扇区号 -> 打开的 inode
}

impl InodeRegistry {
    pub fn new(device: Arc<dyn BlockDevice>, allocator: Arc<dyn SectorAllocator>) -> Self {
        Self {
            device,
            allocator,
            open_inodes: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SectorId, Arc<Inode>>> {
        self.open_inodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 在 `sector` 上写一个新的 inode 记录，并扩展到 `length` 字节。
    /// 空间不足时回收已经分配的扇区并返回 `DiskFull`。
    pub fn create(&self, sector: SectorId, length: u32) -> Result<()> {
        let mut record = FileRecord::new();
        let achieved = record.grow(length, self.device.as_ref(), self.allocator.as_ref())?;
        if achieved < length {
            record.free(self.device.as_ref(), self.allocator.as_ref())?;
            return Err(FsError::DiskFull);
        }
        record.store(self.device.as_ref(), sector)?;
        debug!("created inode {} with {} bytes", sector, length);
        Ok(())
    }

    /// 打开 `sector` 上的 inode。已经打开时返回同一个句柄并增加引用计数。
    pub fn open(&self, sector: SectorId) -> Result<Arc<Inode>> {
        let mut open_inodes = self.lock();
        if let Some(inode) = open_inodes.get(&sector) {
            inode.lock().open_count += 1;
            return Ok(Arc::clone(inode));
        }

        let record = FileRecord::load(self.device.as_ref(), sector)?;
        if !record.is_valid() {
            return Err(FsError::InvalidInode(sector));
        }
        let inode = Arc::new(Inode::new(
            sector,
            record,
            Arc::clone(&self.device),
            Arc::clone(&self.allocator),
        ));
        open_inodes.insert(sector, Arc::clone(&inode));
        debug!("opened inode {} ({} bytes)", sector, record.length);
        Ok(inode)
    }

    /// 再打开一次已经持有的 inode
    pub fn reopen(&self, inode: &Arc<Inode>) -> Arc<Inode> {
        let _open_inodes = self.lock();
        inode.lock().open_count += 1;
        Arc::clone(inode)
    }

    /// 关闭一个句柄。最后一个打开者关闭时注销；若已被删除，回收全部数据扇区、
    /// 索引扇区和 inode 自己的扇区，否则把记录写回磁盘。
    pub fn close(&self, inode: Arc<Inode>) -> Result<()> {
        let mut open_inodes = self.lock();
        let mut state = inode.lock();
        assert!(
            state.open_count > 0,
            "inode {} closed more times than opened",
            inode.sector()
        );
        state.open_count -= 1;
        if state.open_count > 0 {
            return Ok(());
        }

        open_inodes.remove(&inode.sector());
        if state.removed {
            let freed = state
                .record
                .free(self.device.as_ref(), self.allocator.as_ref())?;
            // 抹掉记录，之后再 open 这个扇区会被识别为无效 inode
            self.device.write_block(inode.sector(), &ZERO_SECTOR)?;
            self.allocator.release(inode.sector(), 1);
            info!(
                "reclaimed inode {}: {} sectors plus the inode sector",
                inode.sector(),
                freed
            );
        } else {
            state.record.store(self.device.as_ref(), inode.sector())?;
            debug!("closed inode {}", inode.sector());
        }
        Ok(())
    }

    /// 标记删除，其他打开者仍然可以继续读写，直到最后一次 close
    pub fn remove(&self, inode: &Inode) {
        inode.mark_removed();
        debug!("inode {} marked for removal", inode.sector());
    }

    pub fn is_open(&self, sector: SectorId) -> bool {
        self.lock().contains_key(&sector)
    }

    /// inode 的当前状态，不打开也不写回：已打开时取内存中的记录，否则直接读磁盘
    pub fn snapshot(&self, sector: SectorId) -> Result<InodeSnapshot> {
        let open_inodes = self.lock();
        if let Some(inode) = open_inodes.get(&sector) {
            let state = inode.lock();
            return Ok(InodeSnapshot {
                record: state.record,
                open_count: state.open_count,
                removed: state.removed,
            });
        }

        let record = FileRecord::load(self.device.as_ref(), sector)?;
        if !record.is_valid() {
            return Err(FsError::InvalidInode(sector));
        }
        Ok(InodeSnapshot {
            record,
            open_count: 0,
            removed: false,
        })
    }

    /// 当前打开的 inode 个数
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 把所有打开且未删除的 inode 记录写回磁盘
    pub fn sync(&self) -> Result<()> {
        let open_inodes = self.lock();
        for inode in open_inodes.values() {
            if !inode.is_removed() {
                inode.persist()?;
            }
        }
        Ok(())
    }
}
