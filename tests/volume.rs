use std::{sync::Arc, thread};

use growfs::{
    disk::{FileDisk, MemDisk},
    fs::{
        config::{DIRECT_PTRS, FANOUT, INDIRECT_PTRS},
        FileSystem, FileTable, OpenMode,
    },
    FsError, SECTOR_SIZE,
};
use tempfile::tempdir;

const RW: OpenMode = OpenMode::READ.union(OpenMode::WRITE);

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[test]
fn data_survives_remount() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("disk.img");
    // 越过一级间接区，进入二级间接区
    let len = (DIRECT_PTRS + INDIRECT_PTRS * FANOUT + 3) * SECTOR_SIZE + 77;
    let data = pattern(len);

    let (sector, used) = {
        let fs = FileSystem::format(Arc::new(FileDisk::open(&path, 4096).unwrap())).unwrap();
        let sector = fs.create(0).unwrap();
        let mut file = fs.open(sector, RW).unwrap();
        assert_eq!(file.write(&data).unwrap(), len);
        fs.close(file).unwrap();
        fs.sync().unwrap();
        (sector, fs.usage().used)
    };

    let fs = FileSystem::mount(Arc::new(FileDisk::open(&path, 4096).unwrap())).unwrap();
    assert_eq!(fs.usage().used, used);

    let stat = fs.stat(sector).unwrap();
    assert_eq!(stat.length as usize, len);
    assert_eq!(stat.data_sectors, len.div_ceil(SECTOR_SIZE));
    // 9 个一级间接块 + 1 个二级间接块 + 1 个内层间接块
    assert_eq!(stat.index_sectors, INDIRECT_PTRS + 2);

    let mut file = fs.open(sector, OpenMode::READ).unwrap();
    let mut back = vec![0u8; len + 100];
    assert_eq!(file.read(&mut back).unwrap(), len);
    assert_eq!(&back[..len], &data[..]);
    fs.close(file).unwrap();
}

#[test]
fn mount_rejects_blank_image() {
    let dir = tempdir().unwrap();
    let disk = FileDisk::open(dir.path().join("blank.img"), 128).unwrap();
    assert!(matches!(
        FileSystem::mount(Arc::new(disk)),
        Err(FsError::Corrupted(_))
    ));
}

#[test]
fn remove_while_open_defers_reclamation() {
    let fs = FileSystem::format(Arc::new(MemDisk::new(2048))).unwrap();
    let baseline = fs.usage().used;
    let sector = fs.create(0).unwrap();

    let mut table = FileTable::new();
    let fd = table.install(fs.open(sector, RW).unwrap());
    table
        .get_mut(fd)
        .unwrap()
        .write(&pattern(40 * SECTOR_SIZE))
        .unwrap();

    fs.remove(sector).unwrap();
    assert!(fs.registry().is_open(sector));
    assert!(fs.stat(sector).unwrap().removed);

    // 删除后原来的打开者照常读写
    let file = table.get_mut(fd).unwrap();
    file.seek(0);
    let mut buf = [0u8; 16];
    assert_eq!(file.read(&mut buf).unwrap(), 16);
    assert_eq!(&buf[..], &pattern(16)[..]);
    assert!(fs.usage().used > baseline);

    fs.close(table.take(fd).unwrap()).unwrap();
    assert_eq!(fs.usage().used, baseline);
    assert!(matches!(
        fs.open(sector, OpenMode::READ),
        Err(FsError::InvalidInode(_))
    ));
}

#[test]
fn sparse_write_zero_fills_and_reclaims_exactly() {
    let fs = FileSystem::format(Arc::new(MemDisk::new(4096))).unwrap();
    let baseline = fs.usage().used;
    let sector = fs.create(0).unwrap();

    let mut file = fs.open(sector, RW).unwrap();
    let far = (DIRECT_PTRS + 2 * FANOUT) * SECTOR_SIZE + 5;
    file.seek(far as u32);
    assert_eq!(file.write(b"tail").unwrap(), 4);

    let mut gap = vec![0xFFu8; 1000];
    assert_eq!(file.read_at(&mut gap, 100).unwrap(), 1000);
    assert!(gap.iter().all(|&b| b == 0));

    let record = file.inode().record();
    assert_eq!(
        fs.usage().used as usize,
        baseline as usize + 1 + record.data_sectors() + record.index_sectors()
    );
    fs.close(file).unwrap();

    fs.remove(sector).unwrap();
    assert_eq!(fs.usage().used, baseline);
}

#[test]
fn exec_handle_blocks_other_writers() {
    let fs = FileSystem::format(Arc::new(MemDisk::new(256))).unwrap();
    let sector = fs.create(SECTOR_SIZE as u32).unwrap();

    let exec = fs.open(sector, OpenMode::READ | OpenMode::EXEC).unwrap();
    let writer = fs.open(sector, RW).unwrap();
    assert_eq!(writer.write_at(b"nope", 0).unwrap(), 0);

    fs.close(exec).unwrap();
    assert_eq!(writer.write_at(b"okay", 0).unwrap(), 4);
    fs.close(writer).unwrap();
}

#[test]
fn concurrent_writers_on_separate_files() {
    let fs = Arc::new(FileSystem::format(Arc::new(MemDisk::new(8192))).unwrap());
    let baseline = fs.usage().used;

    let handles: Vec<_> = (0..4u8)
        .map(|n| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                let sector = fs.create(0).unwrap();
                let file = fs.open(sector, RW).unwrap();
                let data = vec![n; 200 * SECTOR_SIZE + 13];
                assert_eq!(file.write_at(&data, 0).unwrap(), data.len());
                let mut back = vec![0u8; data.len()];
                assert_eq!(file.read_at(&mut back, 0).unwrap(), data.len());
                assert_eq!(back, data);
                fs.close(file).unwrap();
                sector
            })
        })
        .collect();

    let sectors: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for sector in sectors {
        fs.remove(sector).unwrap();
    }
    assert_eq!(fs.usage().used, baseline);
}

#[test]
fn concurrent_appends_to_one_inode_keep_a_consistent_length() {
    let fs = Arc::new(FileSystem::format(Arc::new(MemDisk::new(4096))).unwrap());
    let sector = fs.create(0).unwrap();

    let handles: Vec<_> = (0..4u32)
        .map(|n| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                let file = fs.open(sector, RW).unwrap();
                let chunk = 3 * SECTOR_SIZE as u32;
                let data = vec![n as u8 + 1; chunk as usize];
                assert_eq!(file.write_at(&data, n * chunk).unwrap(), data.len());
                fs.close(file).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let file = fs.open(sector, OpenMode::READ).unwrap();
    assert_eq!(file.length(), 12 * SECTOR_SIZE as u32);
    let mut buf = vec![0u8; 12 * SECTOR_SIZE];
    file.read_at(&mut buf, 0).unwrap();
    for (i, chunk) in buf.chunks(3 * SECTOR_SIZE).enumerate() {
        assert!(chunk.iter().all(|&b| b == i as u8 + 1));
    }
    fs.close(file).unwrap();
}
