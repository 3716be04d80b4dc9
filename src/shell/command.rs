use std::sync::Arc;

use colored::*;
use dialoguer::{theme::ColorfulTheme, Confirm};
use growfs::{
    disk::SectorId,
    fs::{File, FileSystem, OpenMode},
    utils::{format_timestamp, human_bytes},
    Result, SECTOR_SIZE,
};
use indicatif::{ProgressBar, ProgressStyle};

use crate::shell::Session;

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Create(u32),
    Open { sector: SectorId, exec: bool },
    Close(i32),
    Read(i32, usize),
    Write(i32, String),
    Seek(i32, u32),
    Tell(i32),
    Rm(SectorId),
    Stat(SectorId),
    Ls,
    Df,
    Format,
    Sync,
    Exit,
}

pub fn execute_command(cmd: &Command, session: &mut Session) -> Result<()> {
    match cmd {
        Command::Help => print_help(),
        Command::Create(size) => {
            let sector = session.fs.create(*size)?;
            println!(
                "📝 Created file at inode {} ({})",
                sector.to_string().green(),
                human_bytes(*size as u64)
            );
        }
        Command::Open { sector, exec } => {
            let mode = if *exec {
                OpenMode::READ | OpenMode::EXEC
            } else {
                OpenMode::READ | OpenMode::WRITE
            };
            let file = session.fs.open(*sector, mode)?;
            let fd = session.files.install(file);
            println!("📂 Opened inode {} as fd {}", sector, fd.to_string().cyan());
        }
        Command::Close(fd) => {
            let file = session.files.take(*fd)?;
            session.fs.close(file)?;
            println!("✅ Closed fd {}", fd);
        }
        Command::Read(fd, len) => {
            let file = session.files.get_mut(*fd)?;
            let mut buf = vec![0u8; readable_len(file, *len)];
            let n = file.read(&mut buf)?;
            println!("📖 {} bytes read", n.to_string().cyan());
            println!("{}", String::from_utf8_lossy(&buf[..n]));
        }
        Command::Write(fd, text) => {
            let file = session.files.get_mut(*fd)?;
            let n = file.write(text.as_bytes())?;
            if n < text.len() {
                println!(
                    "{} only {} of {} bytes written",
                    "⚠️ ".yellow(),
                    n,
                    text.len()
                );
            } else {
                println!("✏️  {} bytes written", n.to_string().green());
            }
        }
        Command::Seek(fd, pos) => {
            session.files.get_mut(*fd)?.seek(*pos);
            println!("📍 fd {} -> {}", fd, pos);
        }
        Command::Tell(fd) => {
            let file = session.files.get(*fd)?;
            println!("📍 {} / {}", file.tell(), file.length());
        }
        Command::Rm(sector) => {
            session.fs.remove(*sector)?;
            if session.fs.registry().is_open(*sector) {
                println!(
                    "🗑️  Inode {} removed, space is reclaimed after the last close",
                    sector.to_string().red()
                );
            } else {
                println!("🗑️  Removed inode {}", sector.to_string().red());
            }
        }
        Command::Stat(sector) => {
            let stat = session.fs.stat(*sector)?;
            println!(
                "{}\n{}: {}\n{}: {} bytes\n{}: {}\n{}: {}\n{}: {}{}\n",
                "📊 Inode Info".bright_yellow().bold(),
                "Sector".blue(),
                stat.sector,
                "Size".blue(),
                stat.length,
                "Data sectors".blue(),
                stat.data_sectors,
                "Index sectors".blue(),
                stat.index_sectors,
                "Openers".blue(),
                stat.open_count,
                if stat.removed { " (removed)" } else { "" }
            );
        }
        Command::Ls => {
            if session.files.is_empty() {
                println!("{}", "(no open files)".bright_black());
            }
            for (fd, file) in session.files.iter() {
                println!(
                    "{:>4}  inode {:<6} {:>10} bytes  pos {:<8} {:?}",
                    fd.to_string().cyan(),
                    file.inode().sector(),
                    file.length(),
                    file.tell(),
                    file.mode()
                );
            }
        }
        Command::Df => print_usage(&session.fs),
        Command::Format => format_disk(session)?,
        Command::Sync => {
            session.fs.sync()?;
            println!("💾 Synced");
        }
        Command::Exit => println!("{}", "👋 Exiting GrowFS shell...".yellow().bold()),
    }

    Ok(())
}

/// 请求的长度不超过当前位置到文件末尾的字节数，避免按用户输入分配巨大缓冲区
fn readable_len(file: &File, requested: usize) -> usize {
    let left = file.length().saturating_sub(file.tell()) as usize;
    requested.min(left)
}

fn print_usage(fs: &FileSystem) {
    let usage = fs.usage();
    let sb = fs.super_block();
    println!("{}", format!("💽 {}", sb.fs_type).bright_cyan().bold());
    println!("  formatted at  {}", format_timestamp(sb.formatted_at));
    println!(
        "  total         {} sectors ({})",
        usage.total,
        human_bytes(usage.total as u64 * SECTOR_SIZE as u64)
    );
    println!("  used          {} sectors", usage.used.to_string().yellow());
    println!(
        "  free          {} sectors ({})",
        usage.free.to_string().green(),
        human_bytes(usage.free as u64 * SECTOR_SIZE as u64)
    );
}

fn format_disk(session: &mut Session) -> Result<()> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Format the disk? Every file on it will be lost")
        .default(false)
        .interact()
        .unwrap_or(false);
    if !confirmed {
        println!("{}", "Format cancelled".bright_black());
        return Ok(());
    }

    let pb = ProgressBar::new(3);
    if let Ok(style) = ProgressStyle::with_template("[{bar:40.green/black}] {pos}/{len} {msg}") {
        pb.set_style(style.progress_chars("#>-"));
    }

    pb.set_message("closing open files");
    session.close_all()?;
    pb.inc(1);

    pb.set_message("writing super block and free map");
    let device = Arc::clone(session.fs.device());
    session.fs = FileSystem::format(device)?;
    pb.inc(1);

    pb.set_message("syncing");
    session.fs.sync()?;
    pb.inc(1);
    pb.finish_with_message("✅ Disk formatted successfully!");
    Ok(())
}

fn print_help() {
    println!("{}", "📘 GrowFS Commands".bright_cyan().bold());
    println!(
        "{}",
        "
  create <size>        Create a zero-filled file, prints its inode sector
  open <sector> [exec] Open an inode (exec denies writes while open)
  close <fd>           Close a descriptor
  read <fd> <len>      Read up to <len> bytes at the current position
  write <fd> <text>    Write text at the current position
  seek <fd> <pos>      Move the position (may go past the end)
  tell <fd>            Show position and length
  rm <sector>          Remove an inode
  stat <sector>        Show inode info
  ls                   List open descriptors
  df                   Show disk usage
  format               Format the disk
  sync                 Flush metadata to disk
  help                 Show this help message
  exit                 Quit the shell
"
        .bright_black()
    );
}
