use std::{collections::BTreeMap, sync::Arc};

use bitflags::bitflags;

use crate::fs::{
    error::{FsError, Result},
    inode::Inode,
};

bitflags! {
    /// 打开模式
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenMode: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        /// 作为可执行映像打开：打开期间禁止任何人写入
        const EXEC = 0b100;
    }
}

/// 打开的文件：一个 inode 句柄加上读写位置
#[derive(Debug)]
pub struct File {
    inode: Arc<Inode>,
    pos: u32,
    mode: OpenMode,
}

impl File {
    pub(crate) fn new(inode: Arc<Inode>, mode: OpenMode) -> Self {
        if mode.contains(OpenMode::EXEC) {
            inode.deny_write();
        }
        Self {
            inode,
            pos: 0,
            mode,
        }
    }

    /// 交还 inode 句柄，EXEC 模式下恢复写入
    pub(crate) fn into_inode(self) -> Arc<Inode> {
        if self.mode.contains(OpenMode::EXEC) {
            self.inode.allow_write();
        }
        self.inode
    }

    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn length(&self) -> u32 {
        self.inode.length()
    }

    pub fn tell(&self) -> u32 {
        self.pos
    }

    /// 移动读写位置，可以越过文件末尾（之后的写入会先补零扩容）
    pub fn seek(&mut self, pos: u32) {
        self.pos = pos;
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.read_at(buf, self.pos)?;
        self.pos += n as u32;
        Ok(n)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.write_at(buf, self.pos)?;
        self.pos += n as u32;
        Ok(n)
    }

    /// 按绝对位置读，不移动读写位置
    pub fn read_at(&self, buf: &mut [u8], offset: u32) -> Result<usize> {
        if !self.mode.contains(OpenMode::READ) {
            return Err(FsError::AccessDenied("reading"));
        }
        self.inode.read_at(buf, offset)
    }

    pub fn write_at(&self, buf: &[u8], offset: u32) -> Result<usize> {
        if !self.mode.contains(OpenMode::WRITE) {
            return Err(FsError::AccessDenied("writing"));
        }
        self.inode.write_at(buf, offset)
    }
}

/// 0 和 1 留给控制台
pub const FIRST_FD: i32 = 2;

/// 文件描述符表，描述符单调递增，不复用
#[derive(Debug)]
pub struct FileTable {
    files: BTreeMap<i32, File>,
    next_fd: i32,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            next_fd: FIRST_FD,
        }
    }

    pub fn install(&mut self, file: File) -> i32 {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.files.insert(fd, file);
        fd
    }

    pub fn get(&self, fd: i32) -> Result<&File> {
        self.files.get(&fd).ok_or(FsError::BadDescriptor(fd))
    }

    pub fn get_mut(&mut self, fd: i32) -> Result<&mut File> {
        self.files.get_mut(&fd).ok_or(FsError::BadDescriptor(fd))
    }

    /// 从表中取出，交给调用方关闭
    pub fn take(&mut self, fd: i32) -> Result<File> {
        self.files.remove(&fd).ok_or(FsError::BadDescriptor(fd))
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &File)> {
        self.files.iter().map(|(&fd, file)| (fd, file))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// 取出全部文件（关闭 shell 时用）
    pub fn drain(&mut self) -> Vec<File> {
        std::mem::take(&mut self.files).into_values().collect()
    }
}
