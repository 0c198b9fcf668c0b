//! 页面绘制：把图片转成字符画，按偏好缩放，分页或纵向连续排列。
//!
//! 终端里按一个字符格约 8×16 像素换算，偏好中的像素值（最大宽高、间距）都按这个比例折算。

use std::collections::HashMap;
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use super::*;
use crate::reader::page::{Page, PageImage, PageStatus};
use crate::reader::preference::{PageScale, SidebarPosition};
use crate::reader::viewport::ScrollLayout;

pub(super) const CELL_W_PX: u32 = 8;
pub(super) const CELL_H_PX: u32 = 16;

/// 单页字符画的尺寸上限，避免极端缩放把内存吃光。
const MAX_CELLS: f64 = 2000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Viewport {
    /// 阅读区（不含边框）。
    pub cols: u16,
    pub rows: u16,
    /// 整个终端。
    pub screen_cols: u16,
    pub screen_rows: u16,
}

/// 按缩放方式计算页面占用的字符格，始终保持宽高比。
pub(super) fn fit_cells(dims: (u32, u32), view: Viewport, pref: &Preference) -> (u16, u16) {
    let w = f64::from(dims.0.max(1));
    let h = f64::from(dims.1.max(1));
    let cw = f64::from(CELL_W_PX);
    let ch = f64::from(CELL_H_PX);

    let natural_cols = w / cw;
    let rows_for = |cols: f64| cols * h * cw / (w * ch);
    let cols_for = |rows: f64| rows * w * ch / (h * cw);
    let limit_cols = |px: u32, fallback: u16| {
        if px == 0 {
            f64::from(fallback)
        } else {
            f64::from(px) / cw
        }
    };
    let limit_rows = |px: u32, fallback: u16| {
        if px == 0 {
            f64::from(fallback)
        } else {
            f64::from(px) / ch
        }
    };

    let cols = match pref.scale {
        PageScale::Default => natural_cols.min(f64::from(view.cols)),
        PageScale::Original => natural_cols,
        PageScale::Width => natural_cols.min(limit_cols(pref.max_width_px(), view.cols)),
        PageScale::Height => cols_for(
            rows_for(natural_cols).min(limit_rows(pref.max_height_px(), view.rows)),
        ),
        PageScale::Stretch => limit_cols(pref.max_width_px(), view.cols),
        PageScale::FitWidth => natural_cols.min(f64::from(view.screen_cols)),
        PageScale::FitHeight => cols_for(rows_for(natural_cols).min(f64::from(view.screen_rows))),
        PageScale::StretchWidth => f64::from(view.screen_cols),
        PageScale::StretchHeight => cols_for(f64::from(view.screen_rows)),
    };

    let cols = (cols * pref.zoom_factor()).round().clamp(1.0, MAX_CELLS);
    let rows = rows_for(cols).round().clamp(1.0, MAX_CELLS);
    (cols as u16, rows as u16)
}

/// 页间距折算成行，至少一行。
pub(super) fn gap_rows(pref: &Preference) -> u32 {
    (pref.gaps_px() / CELL_H_PX).max(1)
}

/// 墨色越深字符越密。
pub(super) fn image_to_ascii(img: &DynamicImage, cols: u16, rows: u16) -> Vec<String> {
    const PALETTE: &[u8] = b" .:-=+*#%@";
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Vec::new();
    }

    let gray = img
        .resize_exact(
            u32::from(cols.max(1)),
            u32::from(rows.max(1)),
            FilterType::Triangle,
        )
        .to_luma8();
    let mut lines = Vec::with_capacity(gray.height() as usize);
    for y in 0..gray.height() {
        let mut line = String::with_capacity(gray.width() as usize);
        for x in 0..gray.width() {
            let ink = 1.0 - gray.get_pixel(x, y)[0] as f32 / 255.0;
            let idx = (ink * (PALETTE.len() as f32 - 1.0)).round() as usize;
            line.push(*PALETTE.get(idx).unwrap_or(&b' ') as char);
        }
        lines.push(line);
    }
    lines
}

struct CachedArt {
    size: (u16, u16),
    /// None 表示图片无法解码。
    art: Option<Arc<Vec<String>>>,
}

/// 按页缓存字符画，尺寸变化时重新生成。
#[derive(Default)]
pub(super) struct ArtCache {
    entries: HashMap<usize, CachedArt>,
}

impl ArtCache {
    pub(super) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(super) fn render(
        &mut self,
        index: usize,
        page_image: &PageImage,
        cols: u16,
        rows: u16,
    ) -> Option<Arc<Vec<String>>> {
        if let Some(cached) = self.entries.get(&index)
            && cached.size == (cols, rows)
        {
            return cached.art.clone();
        }
        let art = match image::load_from_memory(page_image.bytes()) {
            Ok(img) => Some(Arc::new(image_to_ascii(&img, cols, rows))),
            Err(err) => {
                warn!(target: "tui", "第 {} 页图片解码失败: {err}", index + 1);
                None
            }
        };
        self.entries.insert(
            index,
            CachedArt {
                size: (cols, rows),
                art: art.clone(),
            },
        );
        art
    }
}

fn placeholder_text(page: &Page) -> String {
    match page.status() {
        PageStatus::Idle => format!("第 {} 页 · 等待加载", page.number()),
        PageStatus::Downloading => format!("第 {} 页 · 下载中…", page.number()),
        PageStatus::Failed => format!("第 {} 页加载失败，按 r 重试", page.number()),
        PageStatus::Downloaded(_) => format!("第 {} 页图片无法显示", page.number()),
    }
}

fn page_lines(app: &mut App, index: usize, view: Viewport) -> Vec<String> {
    let Some(session) = app.session.as_ref() else {
        return Vec::new();
    };
    let Some(page) = session.pages().get(index) else {
        return Vec::new();
    };
    if let PageStatus::Downloaded(page_image) = page.status()
        && let Some(dims) = page_image.dimensions()
    {
        let (cols, rows) = fit_cells(dims, view, session.preferences());
        if let Some(art) = app.art.render(index, page_image, cols, rows) {
            return art.as_ref().clone();
        }
    }
    vec![placeholder_text(page)]
}

/// 页面在滚动布局中的高度：已下载的按缩放结果，其余占满一屏。
fn page_height(page: &Page, view: Viewport, pref: &Preference) -> u32 {
    page.image()
        .and_then(PageImage::dimensions)
        .map(|dims| u32::from(fit_cells(dims, view, pref).1))
        .unwrap_or_else(|| u32::from(view.rows.max(1)))
}

pub(super) fn draw_reader(frame: &mut ratatui::Frame, app: &mut App) {
    let (main, log_area) = split_with_log(frame.size());
    let rows = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(main);
    let (body, status_area) = (rows[0], rows[1]);

    let Some(pref) = app.preferences().cloned() else {
        return;
    };
    if app.session.is_none() {
        let waiting = Paragraph::new("正在加载章节…")
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Kasen Reader"));
        frame.render_widget(waiting, body);
        render_status(frame, status_area, app);
        render_log_box(frame, log_area, app);
        return;
    }

    let (reader_area, sidebar_area) = if pref.show_sidebar && body.width > SIDEBAR_WIDTH * 2 {
        let parts = match pref.sidebar_position {
            SidebarPosition::Left => Layout::default()
                .direction(LayoutDirection::Horizontal)
                .constraints([Constraint::Length(SIDEBAR_WIDTH), Constraint::Min(10)])
                .split(body),
            SidebarPosition::Right => Layout::default()
                .direction(LayoutDirection::Horizontal)
                .constraints([Constraint::Min(10), Constraint::Length(SIDEBAR_WIDTH)])
                .split(body),
        };
        match pref.sidebar_position {
            SidebarPosition::Left => (parts[1], Some(parts[0])),
            SidebarPosition::Right => (parts[0], Some(parts[1])),
        }
    } else {
        (body, None)
    };

    app.last_reader_area = Some(reader_area);
    app.last_chapter_list = None;
    if let Some(area) = sidebar_area {
        sidebar::draw_sidebar(frame, area, app);
    }

    let screen = frame.size();
    let view = Viewport {
        cols: reader_area.width.saturating_sub(2).max(1),
        rows: reader_area.height.saturating_sub(2).max(1),
        screen_cols: screen.width,
        screen_rows: screen.height,
    };
    if pref.direction.is_scroll() {
        draw_scroll(frame, reader_area, view, &pref, app);
    } else {
        draw_paged(frame, reader_area, view, app);
    }

    render_status(frame, status_area, app);
    render_log_box(frame, log_area, app);
}

fn reader_block(app: &App) -> Block<'static> {
    let title = app
        .session
        .as_ref()
        .map(|s| {
            let mut title = s.title();
            if s.is_loading() {
                title.push_str(" · 加载中");
            }
            title
        })
        .unwrap_or_default();
    let mut block = Block::default().borders(Borders::ALL).title(title);
    if let Some(hint) = next_chapter_hint(app) {
        block = block.title_bottom(Line::from(hint).alignment(Alignment::Right));
    }
    block
}

fn next_chapter_hint(app: &App) -> Option<String> {
    let session = app.session.as_ref()?;
    if !session.shows_next_chapter_hint() {
        return None;
    }
    let next = session.pagination().next.as_ref()?;
    Some(format!(
        " 下一章（{}）: {} ",
        session.preferences().keybinds.next_chapter,
        next.short_label()
    ))
}

fn draw_paged(frame: &mut ratatui::Frame, area: Rect, view: Viewport, app: &mut App) {
    let current = app.session.as_ref().map(|s| s.current_index()).unwrap_or(0);
    let lines = page_lines(app, current, view);

    app.page_scroll_max = u16::try_from(lines.len())
        .unwrap_or(u16::MAX)
        .saturating_sub(view.rows);
    app.page_scroll = app.page_scroll.min(app.page_scroll_max);

    let paragraph = Paragraph::new(lines.into_iter().map(Line::from).collect::<Vec<_>>())
        .block(reader_block(app))
        .alignment(Alignment::Center)
        .scroll((app.page_scroll, 0));
    frame.render_widget(paragraph, area);
}

fn draw_scroll(
    frame: &mut ratatui::Frame,
    area: Rect,
    view: Viewport,
    pref: &Preference,
    app: &mut App,
) {
    let now = Instant::now();
    let Some(session) = app.session.as_mut() else {
        return;
    };
    let heights: Vec<u32> = session
        .pages()
        .iter()
        .map(|page| page_height(page, view, pref))
        .collect();
    session.set_layout(ScrollLayout::new(&heights, gap_rows(pref)), now);

    let layout = session.layout().clone();
    let top = session.scroll_top();
    let bottom = top.saturating_add(u32::from(view.rows));

    let mut visible: HashMap<usize, Vec<String>> = HashMap::new();
    let mut lines: Vec<Line> = Vec::with_capacity(usize::from(view.rows));
    for y in top..bottom {
        let Some(region) = layout.region_at(y) else {
            lines.push(Line::from(""));
            continue;
        };
        if !visible.contains_key(&region) {
            let art = page_lines(app, region, view);
            visible.insert(region, art);
        }
        let row = (y - layout.top_of(region).unwrap_or(y)) as usize;
        let text = visible
            .get(&region)
            .and_then(|art| art.get(row))
            .cloned()
            .unwrap_or_default();
        lines.push(Line::from(text));
    }

    let paragraph = Paragraph::new(lines)
        .block(reader_block(app))
        .alignment(Alignment::Center);
    frame.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn view() -> Viewport {
        Viewport {
            cols: 80,
            rows: 40,
            screen_cols: 120,
            screen_rows: 50,
        }
    }

    fn pref(scale: PageScale) -> Preference {
        Preference {
            scale,
            ..Preference::default()
        }
    }

    #[test]
    fn default_scale_shrinks_to_reader_width() {
        assert_eq!(fit_cells((1600, 2400), view(), &pref(PageScale::Default)), (80, 60));
        // 窄图保持原始大小
        assert_eq!(fit_cells((320, 480), view(), &pref(PageScale::Default)), (40, 30));
    }

    #[test]
    fn original_ignores_the_reader_area() {
        assert_eq!(fit_cells((1600, 2400), view(), &pref(PageScale::Original)), (200, 150));
    }

    #[test]
    fn zoom_multiplies_the_fitted_size() {
        let mut p = pref(PageScale::Default);
        p.zoom = "0.5".to_string();
        assert_eq!(fit_cells((1600, 2400), view(), &p), (40, 30));
    }

    #[test]
    fn stretch_height_fills_the_screen_height() {
        let (_, rows) = fit_cells((1600, 2400), view(), &pref(PageScale::StretchHeight));
        assert_eq!(rows, 50);
    }

    #[test]
    fn width_scale_uses_max_width_in_pixels() {
        let mut p = pref(PageScale::Width);
        p.max_width = "400".to_string();
        assert_eq!(fit_cells((1600, 2400), view(), &p), (50, 38));
    }

    #[test]
    fn gaps_become_at_least_one_row() {
        let mut p = Preference::default();
        assert_eq!(gap_rows(&p), 1);
        p.gaps = "64".to_string();
        assert_eq!(gap_rows(&p), 4);
    }

    #[test]
    fn dark_pixels_map_to_dense_glyphs() {
        let black = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 2, Luma([0])));
        assert_eq!(image_to_ascii(&black, 4, 2), vec!["@@@@", "@@@@"]);
        let white = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 2, Luma([255])));
        assert_eq!(image_to_ascii(&white, 2, 1), vec!["  "]);
    }
}
