//! 阅读位置：深链页码的来源，以及翻页后写回的位置。

use std::collections::BTreeMap;

use tracing::warn;

use crate::base_system::chapter_link::page_from_path;
use crate::base_system::storage::PersistentStore;

pub const HISTORY_KEY: &str = "history";

pub trait Location {
    /// 当前路径中的页码（从 1 开始），没有时为 None。
    fn current_page_number(&self) -> Option<usize>;
    fn replace_path(&mut self, path: &str);
    fn path(&self) -> &str;
}

#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemoryLocation {
    path: String,
    replacements: usize,
}

#[cfg(test)]
impl MemoryLocation {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            replacements: 0,
        }
    }

    /// `replace_path` 被调用的次数。
    pub fn replacements(&self) -> usize {
        self.replacements
    }
}

#[cfg(test)]
impl Location for MemoryLocation {
    fn current_page_number(&self) -> Option<usize> {
        page_from_path(&self.path)
    }

    fn replace_path(&mut self, path: &str) {
        self.path = path.to_string();
        self.replacements += 1;
    }

    fn path(&self) -> &str {
        &self.path
    }
}

/// 记录每个章节最后阅读的位置，终端里没有地址栏，用它充当深链。
pub struct HistoryLocation {
    store: Box<dyn PersistentStore>,
    chapter_id: i64,
    path: String,
    entries: BTreeMap<String, String>,
}

impl HistoryLocation {
    /// 显式给出的路径优先；否则沿用该章节上次的位置。
    pub fn open(store: Box<dyn PersistentStore>, chapter_id: i64, explicit: Option<String>) -> Self {
        let entries: BTreeMap<String, String> = store
            .get(HISTORY_KEY)
            .and_then(|raw| match serde_json::from_str(&raw) {
                Ok(entries) => Some(entries),
                Err(err) => {
                    warn!(target: "location", "阅读记录解析失败，已忽略: {err}");
                    None
                }
            })
            .unwrap_or_default();

        let path = explicit
            .or_else(|| entries.get(&chapter_id.to_string()).cloned())
            .unwrap_or_else(|| format!("/chapters/{chapter_id}"));

        Self {
            store,
            chapter_id,
            path,
            entries,
        }
    }

    #[cfg(test)]
    pub fn into_store(self) -> Box<dyn PersistentStore> {
        self.store
    }
}

impl Location for HistoryLocation {
    fn current_page_number(&self) -> Option<usize> {
        page_from_path(&self.path)
    }

    fn replace_path(&mut self, path: &str) {
        self.path = path.to_string();
        self.entries
            .insert(self.chapter_id.to_string(), path.to_string());
        let raw = match serde_json::to_string(&self.entries) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(target: "location", "阅读记录序列化失败: {err}");
                return;
            }
        };
        if let Err(err) = self.store.set(HISTORY_KEY, &raw) {
            warn!(target: "location", "阅读记录保存失败，仅保留在内存中: {err}");
        }
    }

    fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_system::storage::MemoryStore;

    #[test]
    fn memory_location_reads_page_from_path() {
        let mut loc = MemoryLocation::new("/chapters/3/7");
        assert_eq!(loc.current_page_number(), Some(7));
        loc.replace_path("/chapters/3/2");
        assert_eq!(loc.current_page_number(), Some(2));
        assert_eq!(loc.replacements(), 1);
    }

    #[test]
    fn history_resumes_last_page_per_chapter() {
        let mut loc = HistoryLocation::open(Box::new(MemoryStore::new()), 3, None);
        assert_eq!(loc.current_page_number(), None);
        loc.replace_path("/chapters/3/9");

        let store = loc.into_store();
        let reopened = HistoryLocation::open(store, 3, None);
        assert_eq!(reopened.current_page_number(), Some(9));

        let other = HistoryLocation::open(reopened.into_store(), 4, None);
        assert_eq!(other.current_page_number(), None);
    }

    #[test]
    fn explicit_path_overrides_history() {
        let store = MemoryStore::new().with_entry(HISTORY_KEY, r#"{"3":"/chapters/3/9"}"#);
        let loc = HistoryLocation::open(Box::new(store), 3, Some("/chapters/3/2".into()));
        assert_eq!(loc.current_page_number(), Some(2));
    }

    #[test]
    fn corrupt_history_is_ignored() {
        let store = MemoryStore::new().with_entry(HISTORY_KEY, "[");
        let loc = HistoryLocation::open(Box::new(store), 3, None);
        assert_eq!(loc.path(), "/chapters/3");
    }
}
