//! Kasen 服务器 HTTP 接口（阻塞 reqwest）。

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::base_system::context::Config;
use crate::reader::models::{ChapterInfo, ReaderData};

/// 章节列表单次拉取上限。
const CHAPTER_LIST_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{message}")]
    Server {
        status: u16,
        message: String,
        cause: Option<String>,
    },
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("decode failed: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn message(&self) -> String {
        match self {
            ApiError::Server { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            ApiError::Server { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }

    /// 状态栏提示用的 “消息: 原因” 形式。
    /// 超时或传输途中断开，提示时与服务器返回的错误区分开。
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ApiError::Transport(err) if err.is_timeout() || err.is_body())
    }

    pub fn toast(&self) -> String {
        match self.cause() {
            Some(cause) if !cause.is_empty() => format!("{}: {}", self.message(), cause),
            _ => self.message(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    cause: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChapterListing {
    #[serde(default)]
    data: Option<Vec<ChapterInfo>>,
    #[serde(default)]
    total: Option<u64>,
}

/// 页面图片来源。下载线程通过它拉取二进制内容，重复调用不能有副作用。
pub trait ImageSource: Send + Sync {
    fn fetch_image(&self, chapter_id: i64, file_name: &str) -> Result<Vec<u8>, ApiError>;
}

pub struct KasenApi {
    client: Client,
    base: String,
}

impl KasenApi {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, */*"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or(HeaderValue::from_static("kasen-reader")),
        );

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout());
        if let Some(connect) = config.connect_timeout() {
            builder = builder.connect_timeout(connect);
        }

        Ok(Self {
            client: builder.build()?,
            base: config.server_base(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn get_chapter(&self, chapter_id: i64) -> Result<ChapterInfo, ApiError> {
        self.get_json(&format!("/api/chapter/{chapter_id}?preload=project"))
    }

    pub fn get_pages(&self, chapter_id: i64) -> Result<Vec<String>, ApiError> {
        self.get_json(&format!("/api/chapter/{chapter_id}/pages"))
    }

    /// 按章节号倒序返回项目下的章节。
    pub fn get_project_chapters(&self, project_id: i64) -> Result<Vec<ChapterInfo>, ApiError> {
        let listing: ChapterListing = self.get_json(&format!(
            "/api/project/{project_id}/chapters?sort=chapter&order=desc&limit={CHAPTER_LIST_LIMIT}"
        ))?;
        let chapters = listing.data.unwrap_or_default();
        if let Some(total) = listing.total
            && total as usize > chapters.len()
        {
            debug!(target: "api", project_id, total, "章节列表超过单次上限，仅取前 {}", chapters.len());
        }
        Ok(chapters)
    }

    /// 章节信息 + 页面列表 + 同项目章节列表。章节列表拉取失败不影响阅读。
    pub fn load_reader_data(&self, chapter_id: i64) -> Result<ReaderData, ApiError> {
        let mut chapter = self.get_chapter(chapter_id)?;
        chapter.pages = self.get_pages(chapter_id)?;

        let chapters = match chapter.project.as_ref().map(|p| p.id) {
            Some(project_id) => self
                .get_project_chapters(project_id)
                .unwrap_or_else(|err| {
                    warn!(target: "api", project_id, "获取章节列表失败: {err}");
                    Vec::new()
                }),
            None => Vec::new(),
        };
        Ok(ReaderData::new(chapter, chapters))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base, path);
        debug!(target: "api", %url, "GET");
        let resp = check_status(self.client.get(&url).send()?)?;
        let body = resp.text()?;
        serde_json::from_str(&body).map_err(|err| ApiError::Decode(err.to_string()))
    }
}

impl ImageSource for KasenApi {
    fn fetch_image(&self, chapter_id: i64, file_name: &str) -> Result<Vec<u8>, ApiError> {
        let url = format!("{}/pages/{}/{}", self.base, chapter_id, file_name);
        let resp = check_status(self.client.get(&url).send()?)?;
        Ok(resp.bytes()?.to_vec())
    }
}

fn check_status(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(server_error(status, &body))
}

fn server_error(status: StatusCode, body: &str) -> ApiError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.error.message.is_empty() => ApiError::Server {
            status: status.as_u16(),
            message: parsed.error.message,
            cause: parsed.error.cause,
        },
        _ => ApiError::Status(status.as_u16()),
    }
}
