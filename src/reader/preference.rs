//! 阅读偏好：读取、修改与持久化。
//!
//! 偏好整体序列化为一个 JSON 存在 `pref` 键下，任何字段改动都会整份重写。
//! 存储里的内容无法解析时整份丢弃并回退到默认值，不做局部修复。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::base_system::storage::{MemoryStore, PersistentStore, StoreError};

pub const PREFERENCE_KEY: &str = "pref";

const MIN_GAPS: f64 = 10.0;
const MIN_ZOOM: f64 = 0.1;
const MAX_ZOOM: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SidebarPosition {
    #[default]
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    /// 连续滚动，当前页由视口追踪决定。
    TopToBottom,
    RightToLeft,
    #[default]
    LeftToRight,
}

impl Direction {
    pub fn is_scroll(self) -> bool {
        self == Direction::TopToBottom
    }

    pub fn label(self) -> &'static str {
        match self {
            Direction::TopToBottom => "从上到下",
            Direction::RightToLeft => "从右到左",
            Direction::LeftToRight => "从左到右",
        }
    }

    pub fn cycle(self) -> Self {
        match self {
            Direction::TopToBottom => Direction::RightToLeft,
            Direction::RightToLeft => Direction::LeftToRight,
            Direction::LeftToRight => Direction::TopToBottom,
        }
    }
}

impl FromStr for Direction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "toptobottom" | "ttb" | "scroll" => Ok(Direction::TopToBottom),
            "righttoleft" | "rtl" => Ok(Direction::RightToLeft),
            "lefttoright" | "ltr" => Ok(Direction::LeftToRight),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageScale {
    /// 保持原始尺寸，超出容器宽度时缩到容器宽度。
    #[default]
    Default,
    Original,
    Width,
    Height,
    Stretch,
    FitWidth,
    FitHeight,
    StretchWidth,
    StretchHeight,
}

impl PageScale {
    pub const ALL: [PageScale; 9] = [
        PageScale::Default,
        PageScale::Original,
        PageScale::Width,
        PageScale::Height,
        PageScale::Stretch,
        PageScale::FitWidth,
        PageScale::FitHeight,
        PageScale::StretchWidth,
        PageScale::StretchHeight,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PageScale::Default => "默认（超宽时适应容器）",
            PageScale::Original => "原始尺寸",
            PageScale::Width => "超出最大宽度时缩放",
            PageScale::Height => "超出最大高度时缩放",
            PageScale::Stretch => "拉伸到最大宽度",
            PageScale::FitWidth => "超出屏幕宽度时缩放",
            PageScale::FitHeight => "超出屏幕高度时缩放",
            PageScale::StretchWidth => "拉伸到屏幕宽度",
            PageScale::StretchHeight => "拉伸到屏幕高度",
        }
    }
}

impl FromStr for PageScale {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        PageScale::ALL
            .into_iter()
            .find(|scale| format!("{scale:?}").eq_ignore_ascii_case(&wanted))
            .ok_or(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    PreviousChapter,
    NextChapter,
    PreviousPage,
    NextPage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keybinds {
    pub previous_chapter: String,
    pub next_chapter: String,
    pub previous_page: String,
    pub next_page: String,
}

impl Default for Keybinds {
    fn default() -> Self {
        Self {
            previous_chapter: ",".to_string(),
            next_chapter: ".".to_string(),
            previous_page: "ArrowLeft".to_string(),
            next_page: "ArrowRight".to_string(),
        }
    }
}

impl Keybinds {
    /// 按键名到逻辑动作；RightToLeft 下不交换，翻页键始终是“上一页/下一页”。
    pub fn action_for(&self, key: &str) -> Option<KeyAction> {
        [
            (&self.previous_page, KeyAction::PreviousPage),
            (&self.next_page, KeyAction::NextPage),
            (&self.previous_chapter, KeyAction::PreviousChapter),
            (&self.next_chapter, KeyAction::NextChapter),
        ]
        .into_iter()
        .find(|(bound, _)| bound.as_str() == key)
        .map(|(_, action)| action)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preference {
    pub show_sidebar: bool,
    pub sidebar_position: SidebarPosition,

    pub navigate_on_click: bool,
    pub direction: Direction,
    pub scale: PageScale,
    pub max_width: String,
    pub max_height: String,
    pub gaps: String,
    pub zoom: String,

    pub max_preloads: usize,
    pub max_parallel: usize,

    pub keybinds: Keybinds,
}

impl Default for Preference {
    fn default() -> Self {
        Self {
            show_sidebar: false,
            sidebar_position: SidebarPosition::Left,
            navigate_on_click: true,
            direction: Direction::LeftToRight,
            scale: PageScale::Default,
            max_width: "800".to_string(),
            max_height: "0".to_string(),
            gaps: "20".to_string(),
            zoom: "1.0".to_string(),
            max_preloads: 6,
            max_parallel: 3,
            keybinds: Keybinds::default(),
        }
    }
}

impl Preference {
    /// 0 表示不限制。
    pub fn max_width_px(&self) -> u32 {
        parse_px(&self.max_width)
    }

    pub fn max_height_px(&self) -> u32 {
        parse_px(&self.max_height)
    }

    pub fn gaps_px(&self) -> u32 {
        parse_px(&self.gaps)
    }

    pub fn zoom_factor(&self) -> f64 {
        self.zoom
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|z| z.is_finite())
            .map(|z| z.clamp(MIN_ZOOM, MAX_ZOOM))
            .unwrap_or(1.0)
    }

    /// 把所有受限字段拉回合法范围；无法解析的数字串回退为默认值。
    pub fn normalize(&mut self) {
        let defaults = Preference::default();
        self.max_width =
            clamp_numeric(&self.max_width, 0.0, None).unwrap_or(defaults.max_width);
        self.max_height =
            clamp_numeric(&self.max_height, 0.0, None).unwrap_or(defaults.max_height);
        self.gaps = clamp_numeric(&self.gaps, MIN_GAPS, None).unwrap_or(defaults.gaps);
        self.zoom = clamp_numeric(&self.zoom, MIN_ZOOM, Some(MAX_ZOOM)).unwrap_or(defaults.zoom);
        self.max_preloads = self.max_preloads.max(1);
        self.max_parallel = self.max_parallel.max(1);
    }

    /// 以字段名（与存储 JSON 的键一致）修改单个字段；数值会被夹到合法范围。
    pub fn apply(&mut self, field: &str, value: &str) -> Result<(), PreferenceError> {
        let value = value.trim();
        let invalid = || PreferenceError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        };
        match field {
            "showSidebar" => self.show_sidebar = parse_bool(value).ok_or_else(invalid)?,
            "sidebarPosition" => {
                self.sidebar_position = match value.to_ascii_lowercase().as_str() {
                    "left" => SidebarPosition::Left,
                    "right" => SidebarPosition::Right,
                    _ => return Err(invalid()),
                }
            }
            "navigateOnClick" => self.navigate_on_click = parse_bool(value).ok_or_else(invalid)?,
            "direction" => self.direction = value.parse().map_err(|_| invalid())?,
            "scale" => self.scale = value.parse().map_err(|_| invalid())?,
            "maxWidth" => self.max_width = clamp_numeric(value, 0.0, None).ok_or_else(invalid)?,
            "maxHeight" => self.max_height = clamp_numeric(value, 0.0, None).ok_or_else(invalid)?,
            "gaps" => self.gaps = clamp_numeric(value, MIN_GAPS, None).ok_or_else(invalid)?,
            "zoom" => {
                self.zoom = clamp_numeric(value, MIN_ZOOM, Some(MAX_ZOOM)).ok_or_else(invalid)?
            }
            "maxPreloads" => self.max_preloads = parse_count(value).ok_or_else(invalid)?,
            "maxParallel" => self.max_parallel = parse_count(value).ok_or_else(invalid)?,
            "keybinds.previousChapter" => self.keybinds.previous_chapter = parse_key(value, invalid)?,
            "keybinds.nextChapter" => self.keybinds.next_chapter = parse_key(value, invalid)?,
            "keybinds.previousPage" => self.keybinds.previous_page = parse_key(value, invalid)?,
            "keybinds.nextPage" => self.keybinds.next_page = parse_key(value, invalid)?,
            _ => return Err(PreferenceError::UnknownField(field.to_string())),
        }
        Ok(())
    }

    /// 字段当前值的文本形式，可以原样交回 [`Preference::apply`]。
    pub fn value_of(&self, field: &str) -> Option<String> {
        let value = match field {
            "showSidebar" => self.show_sidebar.to_string(),
            "sidebarPosition" => match self.sidebar_position {
                SidebarPosition::Left => "left".to_string(),
                SidebarPosition::Right => "right".to_string(),
            },
            "navigateOnClick" => self.navigate_on_click.to_string(),
            "direction" => format!("{:?}", self.direction),
            "scale" => format!("{:?}", self.scale),
            "maxWidth" => self.max_width.clone(),
            "maxHeight" => self.max_height.clone(),
            "gaps" => self.gaps.clone(),
            "zoom" => self.zoom.clone(),
            "maxPreloads" => self.max_preloads.to_string(),
            "maxParallel" => self.max_parallel.to_string(),
            "keybinds.previousChapter" => self.keybinds.previous_chapter.clone(),
            "keybinds.nextChapter" => self.keybinds.next_chapter.clone(),
            "keybinds.previousPage" => self.keybinds.previous_page.clone(),
            "keybinds.nextPage" => self.keybinds.next_page.clone(),
            _ => return None,
        };
        Some(value)
    }
}

pub const PREFERENCE_FIELDS: &[&str] = &[
    "showSidebar",
    "sidebarPosition",
    "navigateOnClick",
    "direction",
    "scale",
    "maxWidth",
    "maxHeight",
    "gaps",
    "zoom",
    "maxPreloads",
    "maxParallel",
    "keybinds.previousChapter",
    "keybinds.nextChapter",
    "keybinds.previousPage",
    "keybinds.nextPage",
];

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("unknown preference field: {0}")]
    UnknownField(String),
    #[error("invalid value {value:?} for {field}")]
    InvalidValue { field: String, value: String },
    #[error("preference saved in memory only: {0}")]
    Store(#[from] StoreError),
}

fn parse_px(raw: &str) -> u32 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n > 0.0)
        .map(|n| n.round().min(u32::MAX as f64) as u32)
        .unwrap_or(0)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// 负数和 0 都夹到 1。
fn parse_count(raw: &str) -> Option<usize> {
    let n = raw.parse::<i64>().ok()?;
    Some(n.max(1) as usize)
}

fn parse_key<F>(raw: &str, invalid: F) -> Result<String, PreferenceError>
where
    F: Fn() -> PreferenceError,
{
    if raw.is_empty() {
        return Err(invalid());
    }
    Ok(raw.to_string())
}

/// 数值合法时原样保留输入文本，越界时替换为边界值。
fn clamp_numeric(raw: &str, min: f64, max: Option<f64>) -> Option<String> {
    let trimmed = raw.trim();
    let n = trimmed.parse::<f64>().ok().filter(|n| n.is_finite())?;
    if n < min {
        return Some(format_number(min));
    }
    if let Some(max) = max
        && n > max
    {
        return Some(format_number(max));
    }
    Some(trimmed.to_string())
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

/// 偏好的唯一持有者：修改即保存。
pub struct PreferenceStore {
    pref: Preference,
    store: Box<dyn PersistentStore>,
}

impl fmt::Debug for PreferenceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreferenceStore")
            .field("pref", &self.pref)
            .finish_non_exhaustive()
    }
}

impl PreferenceStore {
    /// 读取存储中的偏好；不存在时写入默认值，损坏时丢弃并使用默认值。
    pub fn load(store: Box<dyn PersistentStore>) -> Self {
        let mut this = Self {
            pref: Preference::default(),
            store,
        };

        match this.store.get(PREFERENCE_KEY) {
            Some(raw) => match serde_json::from_str::<Preference>(&raw) {
                Ok(mut pref) => {
                    pref.normalize();
                    this.pref = pref;
                }
                Err(err) => {
                    warn!(target: "preference", "阅读偏好解析失败，使用默认值: {err}");
                }
            },
            None => {
                debug!(target: "preference", "首次运行，写入默认阅读偏好");
                if let Err(err) = this.save() {
                    warn!(target: "preference", "默认阅读偏好保存失败: {err}");
                }
            }
        }
        this
    }

    /// 不读写任何存储的默认偏好，用于把真正的偏好从会话中移出时占位。
    pub(crate) fn detached() -> Self {
        Self {
            pref: Preference::default(),
            store: Box::new(MemoryStore::new()),
        }
    }

    pub fn get(&self) -> &Preference {
        &self.pref
    }

    /// 修改并立即保存。保存失败时修改仍然生效（仅保存在内存中）。
    pub fn set(&mut self, field: &str, value: &str) -> Result<(), PreferenceError> {
        self.pref.apply(field, value)?;
        self.save()?;
        Ok(())
    }

    pub fn update<F>(&mut self, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Preference),
    {
        mutate(&mut self.pref);
        self.pref.normalize();
        self.save()
    }

    /// 幂等：重复调用写入相同内容。
    pub fn save(&mut self) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&self.pref).map_err(|err| StoreError::Io {
            key: PREFERENCE_KEY.to_string(),
            source: std::io::Error::other(err),
        })?;
        self.store.set(PREFERENCE_KEY, &raw)
    }

    #[cfg(test)]
    pub fn into_store(self) -> Box<dyn PersistentStore> {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_system::storage::{FileStore, MemoryStore};

    #[test]
    fn first_load_persists_defaults() {
        let prefs = PreferenceStore::load(Box::new(MemoryStore::new()));
        assert_eq!(prefs.get(), &Preference::default());

        let store = prefs.into_store();
        let raw = store.get(PREFERENCE_KEY).unwrap();
        assert!(raw.contains("\"maxPreloads\":6"));
        assert!(raw.contains("\"previousPage\":\"ArrowLeft\""));
    }

    #[test]
    fn corrupt_blob_falls_back_to_defaults() {
        let store = MemoryStore::new().with_entry(PREFERENCE_KEY, "{not json");
        let prefs = PreferenceStore::load(Box::new(store));
        assert_eq!(prefs.get(), &Preference::default());
    }

    #[test]
    fn partial_blob_is_discarded_wholesale() {
        let store = MemoryStore::new().with_entry(PREFERENCE_KEY, r#"{"maxPreloads":2}"#);
        let prefs = PreferenceStore::load(Box::new(store));
        assert_eq!(prefs.get().max_preloads, 6);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut prefs = PreferenceStore::load(Box::new(FileStore::new(dir.path())));
        prefs.set("direction", "rtl").unwrap();
        prefs.set("zoom", "1.5").unwrap();
        prefs.set("keybinds.nextPage", "l").unwrap();
        prefs
            .update(|p| {
                p.show_sidebar = true;
                p.scale = PageScale::FitHeight;
            })
            .unwrap();
        let before = prefs.get().clone();
        prefs.save().unwrap();

        let reloaded = PreferenceStore::load(Box::new(FileStore::new(dir.path())));
        assert_eq!(reloaded.get(), &before);
    }

    #[test]
    fn numeric_fields_are_clamped() {
        let mut pref = Preference::default();
        pref.apply("maxPreloads", "0").unwrap();
        pref.apply("maxParallel", "-3").unwrap();
        pref.apply("gaps", "2").unwrap();
        pref.apply("zoom", "9").unwrap();
        pref.apply("maxWidth", "-10").unwrap();
        assert_eq!(pref.max_preloads, 1);
        assert_eq!(pref.max_parallel, 1);
        assert_eq!(pref.gaps, "10");
        assert_eq!(pref.zoom, "2");
        assert_eq!(pref.max_width, "0");

        pref.apply("zoom", "0.01").unwrap();
        assert_eq!(pref.zoom, "0.1");
        pref.apply("zoom", "1.25").unwrap();
        assert_eq!(pref.zoom, "1.25");
    }

    #[test]
    fn unparsable_numbers_are_rejected_and_value_kept() {
        let mut pref = Preference::default();
        let err = pref.apply("maxWidth", "wide").unwrap_err();
        assert!(matches!(err, PreferenceError::InvalidValue { .. }));
        assert_eq!(pref.max_width, "800");
        assert!(pref.apply("maxPreloads", "many").is_err());
        assert_eq!(pref.max_preloads, 6);
    }

    #[test]
    fn unknown_field_is_reported() {
        let mut pref = Preference::default();
        assert!(matches!(
            pref.apply("colour", "red"),
            Err(PreferenceError::UnknownField(_))
        ));
    }

    #[test]
    fn unavailable_storage_keeps_change_in_memory() {
        let mut prefs = PreferenceStore::load(Box::new(MemoryStore::read_only()));
        let err = prefs.set("maxParallel", "5").unwrap_err();
        assert!(matches!(err, PreferenceError::Store(StoreError::ReadOnly)));
        assert_eq!(prefs.get().max_parallel, 5);
    }

    #[test]
    fn keybinds_map_to_logical_actions() {
        let binds = Keybinds::default();
        assert_eq!(binds.action_for("ArrowLeft"), Some(KeyAction::PreviousPage));
        assert_eq!(binds.action_for("."), Some(KeyAction::NextChapter));
        assert_eq!(binds.action_for("x"), None);
    }

    #[test]
    fn direction_parses_short_and_long_names() {
        assert_eq!("ttb".parse::<Direction>(), Ok(Direction::TopToBottom));
        assert_eq!("Right-to-left".parse::<Direction>(), Ok(Direction::RightToLeft));
        assert_eq!("LeftToRight".parse::<Direction>(), Ok(Direction::LeftToRight));
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!("fit_width".parse::<PageScale>(), Ok(PageScale::FitWidth));
    }

    #[test]
    fn every_field_value_can_be_applied_back() {
        let mut pref = Preference::default();
        pref.direction = Direction::RightToLeft;
        pref.scale = PageScale::StretchHeight;
        let mut copy = Preference::default();
        for field in PREFERENCE_FIELDS {
            let value = pref.value_of(field).unwrap();
            copy.apply(field, &value).unwrap();
        }
        assert_eq!(copy, pref);
        assert_eq!(pref.value_of("colour"), None);
    }
}
