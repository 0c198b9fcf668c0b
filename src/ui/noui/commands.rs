//! 命令行模式的输入解析。

use crate::reader::preference::Direction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Command {
    First,
    Previous,
    Next,
    Last,
    Jump(usize),
    /// 省略页码时重试当前页。
    Retry(Option<usize>),
    /// 省略方向时按顺序切换。
    Direction(Option<Direction>),
    Set { field: String, value: String },
    Prefs,
    Wait,
    Info,
    Chapters,
    PreviousChapter,
    NextChapter,
    Open(i64),
    Help,
    Quit,
}

pub(super) fn parse_command(input: &str) -> Result<Command, String> {
    let mut parts = input.split_whitespace();
    let Some(head) = parts.next() else {
        return Err("请输入命令，h 查看帮助".to_string());
    };
    let rest: Vec<&str> = parts.collect();

    if let Ok(number) = head.parse::<usize>()
        && rest.is_empty()
    {
        return Ok(Command::Jump(number));
    }

    let command = match head.to_ascii_lowercase().as_str() {
        "f" | "first" => Command::First,
        "p" | "prev" => Command::Previous,
        "n" | "next" => Command::Next,
        "l" | "last" => Command::Last,
        "j" | "jump" => Command::Jump(parse_number(rest.first().copied(), "页码")?),
        "r" | "retry" => match rest.first() {
            Some(raw) => Command::Retry(Some(parse_number(Some(*raw), "页码")?)),
            None => Command::Retry(None),
        },
        "d" | "direction" => match rest.first() {
            Some(raw) => Command::Direction(Some(
                raw.parse()
                    .map_err(|_| format!("未知方向: {raw}（ltr / rtl / ttb）"))?,
            )),
            None => Command::Direction(None),
        },
        "set" => {
            let [field, value @ ..] = rest.as_slice() else {
                return Err("用法: set <字段> <值>".to_string());
            };
            if value.is_empty() {
                return Err("用法: set <字段> <值>".to_string());
            }
            Command::Set {
                field: (*field).to_string(),
                value: value.join(" "),
            }
        }
        "prefs" => Command::Prefs,
        "w" | "wait" => Command::Wait,
        "i" | "info" => Command::Info,
        "c" | "chapters" => Command::Chapters,
        "[" => Command::PreviousChapter,
        "]" => Command::NextChapter,
        "o" | "open" => {
            let raw = rest.first().ok_or_else(|| "用法: o <章节ID>".to_string())?;
            Command::Open(raw.parse().map_err(|_| format!("章节ID无效: {raw}"))?)
        }
        "h" | "help" | "?" => Command::Help,
        "q" | "quit" | "exit" => Command::Quit,
        _ => return Err(format!("未知命令: {head}，h 查看帮助")),
    };
    Ok(command)
}

fn parse_number(raw: Option<&str>, what: &str) -> Result<usize, String> {
    let raw = raw.ok_or_else(|| format!("缺少{what}"))?;
    raw.parse().map_err(|_| format!("{what}无效: {raw}"))
}
