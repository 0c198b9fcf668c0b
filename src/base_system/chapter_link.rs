//! 章节 ID/链接解析与规范化。
//!
//! 支持三种输入：纯数字 `12`、站内路径 `/chapters/12/5`、完整链接
//! `https://host/chapters/12/5`。第二段数字是深链页码（从 1 开始）。

use regex::Regex;
use std::sync::OnceLock;

static RE_URL: OnceLock<Regex> = OnceLock::new();
static RE_CHAPTER: OnceLock<Regex> = OnceLock::new();

fn re_url() -> &'static Regex {
    RE_URL.get_or_init(|| Regex::new(r"https?://\S+").expect("compile RE_URL"))
}

fn re_chapter() -> &'static Regex {
    RE_CHAPTER.get_or_init(|| {
        Regex::new(r"/chapters/(\d+)(?:/(\d+))?/?(?:[?#].*)?$").expect("compile RE_CHAPTER")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterLink {
    pub chapter_id: i64,
    /// 深链页码，从 1 开始；未指定时为 None。
    pub page: Option<usize>,
}

impl ChapterLink {
    pub fn path(&self) -> String {
        match self.page {
            Some(page) => chapter_path(self.chapter_id, page),
            None => format!("/chapters/{}", self.chapter_id),
        }
    }
}

/// 阅读器地址栏格式：`/chapters/{id}/{page}`。
pub fn chapter_path(chapter_id: i64, page: usize) -> String {
    format!("/chapters/{chapter_id}/{page}")
}

pub fn parse_chapter_link(input: &str) -> Option<ChapterLink> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return trimmed.parse().ok().map(|chapter_id| ChapterLink {
            chapter_id,
            page: None,
        });
    }

    // 允许粘贴带前后文字的分享内容，先尝试抽出 URL。
    let target = re_url()
        .find(trimmed)
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    let caps = re_chapter().captures(target)?;
    let chapter_id = caps.get(1)?.as_str().parse().ok()?;
    let page = caps
        .get(2)
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .filter(|p| *p > 0);
    Some(ChapterLink { chapter_id, page })
}

/// 从地址栏路径中取页码部分（`/chapters/12/5` → 5）。
pub fn page_from_path(path: &str) -> Option<usize> {
    parse_chapter_link(path).and_then(|link| link.page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_id() {
        assert_eq!(
            parse_chapter_link(" 42 "),
            Some(ChapterLink {
                chapter_id: 42,
                page: None
            })
        );
    }

    #[test]
    fn parses_path_with_page() {
        let link = parse_chapter_link("/chapters/12/5").unwrap();
        assert_eq!(link.chapter_id, 12);
        assert_eq!(link.page, Some(5));
        assert_eq!(link.path(), "/chapters/12/5");
    }

    #[test]
    fn parses_url_embedded_in_text() {
        let link = parse_chapter_link("read this https://kasen.example/chapters/7/3?x=1 now").unwrap();
        assert_eq!(link.chapter_id, 7);
        assert_eq!(link.page, Some(3));
    }

    #[test]
    fn page_zero_is_treated_as_missing() {
        assert_eq!(page_from_path("/chapters/7/0"), None);
        assert_eq!(page_from_path("/chapters/7"), None);
    }

    #[test]
    fn rejects_unrelated_input() {
        assert_eq!(parse_chapter_link("/projects/3/slug"), None);
        assert_eq!(parse_chapter_link(""), None);
    }
}
