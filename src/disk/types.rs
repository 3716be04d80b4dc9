/// 每个扇区（Sector）的大小：512 字节
/// 所有磁盘读写都以扇区为单位进行。
pub const SECTOR_SIZE: usize = 512;

/// 新建磁盘镜像时默认的扇区数：16384 * 512B = 8MB
pub const DEFAULT_SECTOR_COUNT: u32 = 16384;

/// 扇区编号。在磁盘上以 4 字节小端序存储。
pub type SectorId = u32;

/// 一个扇区的数据
pub type Sector = [u8; SECTOR_SIZE];

/// 全零扇区，新分配的数据扇区都用它来清零
pub const ZERO_SECTOR: Sector = [0; SECTOR_SIZE];
