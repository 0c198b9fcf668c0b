//! 单页状态。
//!
//! 页面在打开章节时一次性创建，整个会话内不销毁。下载状态用一个枚举表示，
//! `Downloaded` 与 `Failed` 互斥且都是终态；“排队中”由预加载队列表达，不在这里。

use std::io::Cursor;
use std::sync::Arc;

use image::{ImageFormat, ImageReader};

/// 页面在视口中的区域标识（与页序号一一对应）。
pub type RegionId = usize;

#[derive(Debug, Clone)]
pub struct PageImage {
    bytes: Arc<[u8]>,
    format: Option<ImageFormat>,
    dimensions: Option<(u32, u32)>,
}

impl PageImage {
    /// 只探测格式和尺寸，不做完整解码；探测失败也保留原始字节。
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let format = image::guess_format(&bytes).ok();
        let dimensions = ImageReader::new(Cursor::new(bytes.as_slice()))
            .with_guessed_format()
            .ok()
            .and_then(|reader| reader.into_dimensions().ok());
        Self {
            bytes: bytes.into(),
            format,
            dimensions,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }
}

#[derive(Debug, Clone, Default)]
pub enum PageStatus {
    #[default]
    Idle,
    Downloading,
    Downloaded(PageImage),
    Failed,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub index: usize,
    pub file_name: String,
    pub is_viewing: bool,
    status: PageStatus,
}

impl Page {
    pub fn new(index: usize, file_name: impl Into<String>) -> Self {
        Self {
            index,
            file_name: file_name.into(),
            is_viewing: false,
            status: PageStatus::Idle,
        }
    }

    pub fn region(&self) -> RegionId {
        self.index
    }

    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn status(&self) -> &PageStatus {
        &self.status
    }

    pub fn is_downloading(&self) -> bool {
        matches!(self.status, PageStatus::Downloading)
    }

    pub fn is_downloaded(&self) -> bool {
        matches!(self.status, PageStatus::Downloaded(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, PageStatus::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        self.is_downloaded() || self.is_failed()
    }

    pub fn image(&self) -> Option<&PageImage> {
        match &self.status {
            PageStatus::Downloaded(image) => Some(image),
            _ => None,
        }
    }

    pub(crate) fn mark_downloading(&mut self) {
        self.status = PageStatus::Downloading;
    }

    pub(crate) fn mark_downloaded(&mut self, image: PageImage) {
        self.status = PageStatus::Downloaded(image);
    }

    pub(crate) fn mark_failed(&mut self) {
        self.status = PageStatus::Failed;
    }

    /// `Failed → Idle`，其它状态不变。
    pub(crate) fn reset_failed(&mut self) -> bool {
        if self.is_failed() {
            self.status = PageStatus::Idle;
            return true;
        }
        false
    }
}

/// 按章节文件名列表创建页面。
pub fn build_pages(file_names: &[String]) -> Vec<Page> {
    file_names
        .iter()
        .enumerate()
        .map(|(index, name)| Page::new(index, name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(3, 2, image::Rgb([200, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn sniffs_format_and_dimensions() {
        let image = PageImage::from_bytes(tiny_png());
        assert_eq!(image.format(), Some(ImageFormat::Png));
        assert_eq!(image.dimensions(), Some((3, 2)));
    }

    #[test]
    fn unknown_bytes_are_kept_without_metadata() {
        let image = PageImage::from_bytes(b"not an image".to_vec());
        assert_eq!(image.len(), 12);
        assert!(image.format().is_none());
        assert!(image.dimensions().is_none());
    }

    #[test]
    fn terminal_states_are_exclusive() {
        let mut page = Page::new(0, "001.jpg");
        assert!(!page.is_terminal());
        page.mark_downloading();
        assert!(page.is_downloading() && !page.is_terminal());
        page.mark_failed();
        assert!(page.is_failed() && !page.is_downloaded() && !page.is_downloading());
        assert!(page.reset_failed());
        assert!(matches!(page.status(), PageStatus::Idle));
        page.mark_downloaded(PageImage::from_bytes(tiny_png()));
        assert!(page.is_downloaded() && !page.is_failed());
        assert!(!page.reset_failed());
        assert!(page.image().is_some());
    }
}
