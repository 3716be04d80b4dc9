use thiserror::Error;

use crate::disk::SectorId;

/// 文件系统错误类型
#[derive(Error, Debug)]
pub enum FsError {
    #[error("disk I/O error: {0}")]
    Io(#[from] std::io::Error), // 底层 I/O 错误

    #[error("disk space is full")]
    DiskFull, // 磁盘已满

    #[error("invalid inode at sector {0}")]
    InvalidInode(SectorId), // 扇区里不是合法的 inode

    #[error("file system corrupted: {0}")]
    Corrupted(String), // 超级块或空闲位图损坏

    #[error("bad file descriptor: {0}")]
    BadDescriptor(i32),

    #[error("file not opened for {0}")]
    AccessDenied(&'static str), // 打开模式不允许读 / 写

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// 文件系统统一结果类型
pub type Result<T> = std::result::Result<T, FsError>;
