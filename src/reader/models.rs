//! 章节/项目数据结构与章节翻页关系。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    pub id: i64,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterInfo {
    pub id: i64,
    #[serde(default)]
    pub chapter: String,
    #[serde(default)]
    pub volume: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(default)]
    pub project: Option<ProjectInfo>,
}

impl ChapterInfo {
    /// `Vol. 2 Ch. 10 - Title`；卷号与标题缺省时省略对应部分。
    pub fn label(&self) -> String {
        let mut label = self.short_label();
        if let Some(title) = self.title.as_deref().filter(|t| !t.is_empty()) {
            label.push_str(" - ");
            label.push_str(title);
        }
        label
    }

    pub fn short_label(&self) -> String {
        let mut label = String::new();
        if let Some(volume) = self.volume.as_deref().filter(|v| !v.is_empty()) {
            label.push_str("Vol. ");
            label.push_str(volume);
            label.push(' ');
        }
        label.push_str("Ch. ");
        label.push_str(&self.chapter);
        label
    }

    pub fn project_title(&self) -> Option<&str> {
        self.project
            .as_ref()
            .map(|p| p.title.as_str())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterPagination {
    pub current: Option<ChapterInfo>,
    pub previous: Option<ChapterInfo>,
    pub next: Option<ChapterInfo>,
}

impl ChapterPagination {
    /// `listing` 按章节号倒序（最新在前）：下一章在当前章之前，上一章在之后。
    pub fn from_listing(listing: &[ChapterInfo], current_id: i64) -> Self {
        let Some(idx) = listing.iter().position(|c| c.id == current_id) else {
            return Self::default();
        };
        Self {
            current: listing.get(idx).cloned(),
            previous: listing.get(idx + 1).cloned(),
            next: idx.checked_sub(1).and_then(|i| listing.get(i)).cloned(),
        }
    }
}

/// 打开一个章节所需的全部数据。
#[derive(Debug, Clone)]
pub struct ReaderData {
    pub chapter: ChapterInfo,
    pub chapters: Vec<ChapterInfo>,
    pub pagination: ChapterPagination,
}

impl ReaderData {
    pub fn new(chapter: ChapterInfo, chapters: Vec<ChapterInfo>) -> Self {
        let pagination = ChapterPagination::from_listing(&chapters, chapter.id);
        Self {
            chapter,
            chapters,
            pagination,
        }
    }

    /// 不经过服务器构造。
    #[cfg(test)]
    pub fn standalone(chapter_id: i64, pages: Vec<String>) -> Self {
        let chapter = ChapterInfo {
            id: chapter_id,
            chapter: chapter_id.to_string(),
            volume: None,
            title: None,
            pages,
            project: None,
        };
        Self::new(chapter, Vec::new())
    }
}
