pub mod boot;
pub mod command;
pub mod parse;

use std::{
    io::stdout,
    path::PathBuf,
    sync::{mpsc, Arc},
    thread,
};

use colored::*;
use crossterm::{
    cursor, execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use dialoguer::{theme::ColorfulTheme, Confirm};
use growfs::{
    fs::{FileSystem, FileTable},
    FsError, Result,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use reedline::{
    DefaultCompleter, DefaultPrompt, DefaultPromptSegment, FileBackedHistory, Reedline, Signal,
};

use crate::shell::{
    boot::{perform_disk_initialization, BootOutcome, DiskSource},
    command::{execute_command, Command},
    parse::parse_command,
};

/// 后台启动线程发给前台的进度
pub enum BootProgress {
    Step(&'static str),
    Progress(u64),
    Finished(Result<BootOutcome>),
}

/// 一次 shell 会话：挂载的文件系统加上打开的描述符
pub struct Session {
    pub fs: FileSystem,
    pub files: FileTable,
}

impl Session {
    /// 关闭所有打开的描述符
    pub fn close_all(&mut self) -> Result<()> {
        for file in self.files.drain() {
            self.fs.close(file)?;
        }
        Ok(())
    }
}

pub fn start_shell(source: DiskSource) {
    let fs = match boot(source) {
        Some(fs) => fs,
        None => return,
    };
    let mut session = Session {
        fs,
        files: FileTable::new(),
    };

    let username = whoami::username();
    let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string());

    println!(
        "{}",
        "Type 'help' for available commands. Use ↑↓ for history, Tab for auto-completion.\n"
            .bright_black()
    );

    // 初始化 reedline
    let history_path = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".growfs_history");

    let mut line_editor = Reedline::create();
    match FileBackedHistory::with_file(100, history_path) {
        Ok(history) => line_editor = line_editor.with_history(Box::new(history)),
        Err(e) => warn!("history disabled: {}", e),
    }

    // 命令补全
    let commands = [
        "help", "create", "open", "close", "read", "write", "seek", "tell", "rm", "stat", "ls",
        "df", "format", "sync", "exit",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();
    let completer = DefaultCompleter::new_with_wordlen(commands, 2);
    line_editor = line_editor.with_completer(Box::new(completer));

    loop {
        let prompt = DefaultPrompt::new(
            DefaultPromptSegment::Basic(format!(
                "{}@{} [{} open]",
                username.green().bold(),
                hostname.cyan().bold(),
                session.files.len()
            )),
            DefaultPromptSegment::Basic("GrowFS".bright_blue().bold().to_string()),
        );

        match line_editor.read_line(&prompt) {
            Ok(Signal::Success(buffer)) => {
                let trimmed = buffer.trim();
                if trimmed.is_empty() {
                    continue;
                }

                match parse_command(trimmed) {
                    Some(cmd) => {
                        if let Err(e) = execute_command(&cmd, &mut session) {
                            println!("{} {}", "❌ Error:".red().bold(), e);
                        }
                        if cmd == Command::Exit {
                            break;
                        }
                    }
                    None => println!(
                        "{}",
                        "⚠️  Unknown command or bad arguments. Type 'help' for command list."
                            .yellow()
                    ),
                }
            }
            Ok(Signal::CtrlC) => {
                println!();
                continue;
            }
            Ok(Signal::CtrlD) => {
                println!("{}", "Exiting GrowFS...".yellow());
                break;
            }
            Err(e) => {
                println!("Error reading line: {}", e);
                break;
            }
        }
    }

    if let Err(e) = session.close_all().and_then(|_| session.fs.sync()) {
        println!("{} {}", "❌ Error while unmounting:".red().bold(), e);
    }
    println!("{}", "GoodBye!".bright_yellow());
}

/// 启动动画：后台线程挂载磁盘，前台画进度条
fn boot(source: DiskSource) -> Option<FileSystem> {
    let mut stdout = stdout();
    let _ = execute!(stdout, Clear(ClearType::All), cursor::MoveTo(0, 0));
    println!("{}", "[GrowFS Booting...]".bright_yellow().bold());

    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || perform_disk_initialization(source, tx));

    let pb = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos:>3}% {msg}") {
        pb.set_style(style.progress_chars("=> "));
    }

    let mut outcome = None;
    for progress in rx {
        match progress {
            BootProgress::Step(msg) => pb.println(msg),
            BootProgress::Progress(i) => pb.set_position(i),
            BootProgress::Finished(result) => {
                outcome = Some(result);
                break;
            }
        }
    }
    let _ = worker.join();

    let fs = match outcome {
        Some(Ok(BootOutcome::Mounted(fs))) => fs,
        Some(Ok(BootOutcome::Unformatted(device, reason))) => {
            pb.abandon_with_message("⚠️  No usable file system");
            match format_existing(device, &reason) {
                Ok(Some(fs)) => fs,
                Ok(None) => return None,
                Err(e) => {
                    println!("{} {}", "❌ Format failed:".red().bold(), e);
                    return None;
                }
            }
        }
        Some(Err(e)) => {
            pb.abandon_with_message("❌ Boot failed");
            println!("{} {}", "❌ Error:".red().bold(), e);
            return None;
        }
        None => {
            pb.abandon_with_message("❌ Boot failed");
            println!("{}", "❌ Disk initialization stopped unexpectedly".red().bold());
            return None;
        }
    };
    pb.finish_with_message("✅ Ready!");

    let _ = execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print(format!(
            "Welcome to GrowFS v{}\n",
            env!("CARGO_PKG_VERSION")
        )),
        ResetColor
    );
    Some(fs)
}

/// 已有的镜像挂载失败时，确认后才格式化
fn format_existing(
    device: Arc<dyn growfs::BlockDevice>,
    reason: &FsError,
) -> Result<Option<FileSystem>> {
    println!("{} {}", "⚠️  Mount failed:".yellow().bold(), reason);
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Format this disk image? Its contents will be lost")
        .default(false)
        .interact()
        .unwrap_or(false);
    if !confirmed {
        println!("{}", "Leaving the image untouched.".bright_black());
        return Ok(None);
    }
    FileSystem::format(device).map(Some)
}
