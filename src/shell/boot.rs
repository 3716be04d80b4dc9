use std::{path::PathBuf, sync::mpsc::Sender, sync::Arc, thread, time::Duration};

use growfs::{
    disk::{BlockDevice, FileDisk, MemDisk},
    fs::FileSystem,
};
use log::warn;

use crate::shell::BootProgress;

/// 启动时要打开的磁盘
#[derive(Debug, Clone)]
pub enum DiskSource {
    Image { path: PathBuf, sectors: u32 },
    Memory { sectors: u32 },
}

/// 启动结果：挂载成功，或者镜像里没有可用的文件系统（由前台决定是否格式化）
pub enum BootOutcome {
    Mounted(FileSystem),
    Unformatted(Arc<dyn BlockDevice>, growfs::FsError),
}

/// 在后台线程里打开磁盘并挂载，进度通过 `tx` 发给前台渲染
pub fn perform_disk_initialization(source: DiskSource, tx: Sender<BootProgress>) {
    let _ = tx.send(BootProgress::Step("🧠 Initializing virtual disk..."));

    let (device, fresh): (Arc<dyn BlockDevice>, bool) = match source {
        DiskSource::Memory { sectors } => (Arc::new(MemDisk::new(sectors)), true),
        DiskSource::Image { path, sectors } => {
            let existed = path.exists();
            match FileDisk::open(&path, sectors) {
                Ok(d) => (Arc::new(d), !existed),
                Err(e) => {
                    let _ = tx.send(BootProgress::Finished(Err(e.into())));
                    return;
                }
            }
        }
    };
    let _ = tx.send(BootProgress::Progress(40));

    let outcome = if fresh {
        // 只有“明确是新磁盘”才直接格式化
        let _ = tx.send(BootProgress::Step(
            "🔧 No disk found, formatting new file system...",
        ));
        FileSystem::format(device).map(BootOutcome::Mounted)
    } else {
        let _ = tx.send(BootProgress::Step("⚙️  Mounting file system..."));
        match FileSystem::mount(Arc::clone(&device)) {
            Ok(fs) => Ok(BootOutcome::Mounted(fs)),
            Err(e) => {
                warn!("mount failed: {}", e);
                Ok(BootOutcome::Unformatted(device, e))
            }
        }
    };

    for i in 40..=100 {
        let _ = tx.send(BootProgress::Progress(i));
        thread::sleep(Duration::from_millis(3));
    }
    let _ = tx.send(BootProgress::Finished(outcome));
}
