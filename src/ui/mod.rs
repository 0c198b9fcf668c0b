pub mod noui;
pub mod tui;

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::base_system::context::Config;
use crate::base_system::storage::FileStore;
use crate::network_parser::api::KasenApi;
use crate::reader::location::HistoryLocation;
use crate::reader::models::ReaderData;
use crate::reader::preference::PreferenceStore;
use crate::reader::session::{ChapterSession, SessionOptions};

/// 两种界面共用的启动参数。
#[derive(Debug, Clone)]
pub struct LaunchTarget {
    pub chapter_id: i64,
    /// 显式指定的页码路径；None 时沿用该章节上次的阅读位置。
    pub explicit_path: Option<String>,
}

pub(crate) fn load_preferences(config: &Config) -> PreferenceStore {
    let store = FileStore::new(config.storage_dir());
    debug!(target: "ui", "阅读偏好目录: {}", store.dir().display());
    PreferenceStore::load(Box::new(store))
}

pub(crate) fn open_session(
    config: &Config,
    api: &Arc<KasenApi>,
    data: ReaderData,
    prefs: PreferenceStore,
    explicit_path: Option<String>,
) -> ChapterSession {
    let location = HistoryLocation::open(
        Box::new(FileStore::new(config.storage_dir())),
        data.chapter.id,
        explicit_path,
    );
    ChapterSession::open(
        data,
        prefs,
        Box::new(location),
        api.clone(),
        SessionOptions::from_config(config),
        Instant::now(),
    )
}
