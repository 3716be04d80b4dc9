use std::path::PathBuf;

use clap::Parser;
use env_logger::Env;

use crate::shell::{boot::DiskSource, start_shell};

mod shell;

#[derive(Parser, Debug)]
#[command(version, about = "Interactive shell over a GrowFS disk image")]
struct Args {
    /// Disk image path
    #[arg(short, long, default_value = "disk.img")]
    disk: PathBuf,

    /// Number of 512-byte sectors when creating a new image
    #[arg(short, long, default_value_t = growfs::disk::DEFAULT_SECTOR_COUNT)]
    sectors: u32,

    /// Use an in-memory disk instead of an image file
    #[arg(short, long)]
    memory: bool,
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let source = if args.memory {
        DiskSource::Memory {
            sectors: args.sectors,
        }
    } else {
        DiskSource::Image {
            path: args.disk,
            sectors: args.sectors,
        }
    };
    start_shell(source);
}
