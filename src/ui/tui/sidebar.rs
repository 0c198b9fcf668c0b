//! 侧边栏：章节信息、阅读状态与章节列表。

use ratatui::widgets::{List, ListItem};

use super::*;

pub(super) fn draw_sidebar(frame: &mut ratatui::Frame, area: Rect, app: &mut App) {
    let Some(session) = app.session.as_ref() else {
        return;
    };
    let parts = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([Constraint::Length(9), Constraint::Min(3)])
        .split(area);
    let (info_area, list_area) = (parts[0], parts[1]);

    let pref = session.preferences();
    let chapter = session.chapter();
    let label = |k: &str| Span::styled(k.to_string(), Style::default().fg(Color::DarkGray));
    let info = vec![
        Line::from(Span::styled(
            chapter.project_title().unwrap_or("未知作品").to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(chapter.label()),
        Line::from(vec![
            label("页码 "),
            Span::raw(format!(
                "{} / {}",
                session.current_index() + 1,
                session.page_count()
            )),
        ]),
        Line::from(vec![label("方向 "), Span::raw(pref.direction.label())]),
        Line::from(vec![label("缩放 "), Span::raw(pref.scale.label())]),
        Line::from(vec![
            label("预加载 "),
            Span::raw(format!(
                "{}/{} · 下载 {}/{}",
                session.queue().len(),
                pref.max_preloads,
                session.active_downloads(),
                pref.max_parallel
            )),
        ]),
        Line::from(vec![label("位置 "), Span::raw(session.location_path().to_string())]),
    ];
    let info = Paragraph::new(info)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("章节"));
    frame.render_widget(info, info_area);

    let current_id = chapter.id;
    let items: Vec<ListItem> = session
        .chapters()
        .iter()
        .map(|c| {
            let style = if c.id == current_id {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(Span::styled(c.label(), style)))
        })
        .collect();
    let empty = items.is_empty();
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("章节列表"))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    if empty {
        let hint = Paragraph::new("没有其他章节")
            .block(Block::default().borders(Borders::ALL).title("章节列表"));
        frame.render_widget(hint, list_area);
        return;
    }
    frame.render_stateful_widget(list, list_area, &mut app.sidebar_state);
    app.last_chapter_list = Some(list_area);
}

/// 鼠标点中的章节（列表绘制时的滚动偏移已计入）。
pub(super) fn chapter_at(app: &App, list_area: Rect, row: u16) -> Option<ChapterInfo> {
    let inner_top = list_area.y + 1;
    if row < inner_top || row >= list_area.y + list_area.height.saturating_sub(1) {
        return None;
    }
    let idx = usize::from(row - inner_top) + app.sidebar_state.offset();
    app.session.as_ref()?.chapters().get(idx).cloned()
}
