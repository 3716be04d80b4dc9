use crate::shell::command::Command;

pub fn parse_command(input: &str) -> Option<Command> {
    let tokens: Vec<&str> = input.split_ascii_whitespace().collect();
    let (&cmd, args) = tokens.split_first()?;

    match cmd {
        "help" => Some(Command::Help),
        "create" => args.first()?.parse().ok().map(Command::Create),
        "open" => {
            let sector = args.first()?.parse().ok()?;
            let exec = match args.get(1) {
                None => false,
                Some(&"exec") => true,
                Some(_) => return None,
            };
            Some(Command::Open { sector, exec })
        }
        "close" => args.first()?.parse().ok().map(Command::Close),
        "read" => {
            let fd = args.first()?.parse().ok()?;
            let len = args.get(1)?.parse().ok()?;
            Some(Command::Read(fd, len))
        }
        "write" => {
            let fd_token = *args.first()?;
            let fd = fd_token.parse().ok()?;
            // 保留文本里的原始空白
            let text = input
                .trim_start()
                .strip_prefix(cmd)?
                .trim_start()
                .strip_prefix(fd_token)?
                .trim_start();
            if text.is_empty() {
                return None;
            }
            Some(Command::Write(fd, text.to_string()))
        }
        "seek" => {
            let fd = args.first()?.parse().ok()?;
            let pos = args.get(1)?.parse().ok()?;
            Some(Command::Seek(fd, pos))
        }
        "tell" => args.first()?.parse().ok().map(Command::Tell),
        "rm" => args.first()?.parse().ok().map(Command::Rm),
        "stat" => args.first()?.parse().ok().map(Command::Stat),
        "ls" => Some(Command::Ls),
        "df" => Some(Command::Df),
        "format" => Some(Command::Format),
        "sync" => Some(Command::Sync),
        "exit" | "quit" => Some(Command::Exit),
        _ => None,
    }
}
