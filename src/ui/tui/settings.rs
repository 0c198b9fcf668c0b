//! 阅读设置页：逐项编辑偏好，修改立即生效并保存。

use ratatui::widgets::{List, ListItem};

use super::*;
use crate::reader::preference::PREFERENCE_FIELDS;

fn field_title(field: &str) -> &'static str {
    match field {
        "showSidebar" => "显示侧边栏 (true/false)",
        "sidebarPosition" => "侧边栏位置 (left/right)",
        "navigateOnClick" => "点击翻页 (true/false)",
        "direction" => "阅读方向 (LeftToRight/RightToLeft/TopToBottom)",
        "scale" => "缩放方式",
        "maxWidth" => "最大宽度 px（0 为不限）",
        "maxHeight" => "最大高度 px（0 为不限）",
        "gaps" => "页间距 px（不小于 10）",
        "zoom" => "缩放倍数（0.1 ~ 2.0）",
        "maxPreloads" => "预加载页数",
        "maxParallel" => "同时下载数",
        "keybinds.previousChapter" => "按键: 上一章",
        "keybinds.nextChapter" => "按键: 下一章",
        "keybinds.previousPage" => "按键: 上一页",
        "keybinds.nextPage" => "按键: 下一页",
        _ => "",
    }
}

pub(super) fn handle_event_settings(app: &mut App, event: Event) -> Result<()> {
    let Event::Key(key) = event else {
        return Ok(());
    };
    if key.kind != KeyEventKind::Press {
        return Ok(());
    }

    if app.settings_edit.is_some() {
        match key.code {
            KeyCode::Esc => {
                app.settings_edit = None;
                app.status = "取消修改".to_string();
            }
            KeyCode::Enter => apply_edit(app),
            KeyCode::Backspace => {
                if let Some(buffer) = app.settings_edit.as_mut() {
                    buffer.pop();
                }
            }
            KeyCode::Char(c) => {
                if let Some(buffer) = app.settings_edit.as_mut() {
                    buffer.push(c);
                }
            }
            _ => {}
        }
        return Ok(());
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc | KeyCode::Char('o') => {
            app.view = View::Reader;
            app.status = "返回阅读".to_string();
        }
        KeyCode::Up => select_offset(app, PREFERENCE_FIELDS.len() - 1),
        KeyCode::Down => select_offset(app, 1),
        KeyCode::Enter => {
            let Some(field) = selected_field(app) else {
                return Ok(());
            };
            let current = app
                .preferences()
                .and_then(|p| p.value_of(field))
                .unwrap_or_default();
            app.settings_edit = Some(current);
            app.status = format!("修改 {}，Enter 保存，Esc 取消", field_title(field));
        }
        _ => {}
    }
    Ok(())
}

fn select_offset(app: &mut App, step: usize) {
    let len = PREFERENCE_FIELDS.len();
    let next = app
        .settings_state
        .selected()
        .map(|i| (i + step) % len)
        .unwrap_or(0);
    app.settings_state.select(Some(next));
}

fn selected_field(app: &App) -> Option<&'static str> {
    app.settings_state
        .selected()
        .and_then(|i| PREFERENCE_FIELDS.get(i))
        .copied()
}

fn apply_edit(app: &mut App) {
    let Some(field) = selected_field(app) else {
        return;
    };
    let value = app.settings_edit.take().unwrap_or_default();
    app.status = match app.set_preference(field, &value) {
        Ok(()) => {
            let saved = app
                .preferences()
                .and_then(|p| p.value_of(field))
                .unwrap_or_default();
            format!("已保存: {} = {saved}", field_title(field))
        }
        Err(PreferenceError::Store(err)) => {
            warn!(target: "tui", "阅读偏好保存失败: {err}");
            "已修改，但保存失败（仅本次有效）".to_string()
        }
        Err(err) => {
            app.settings_edit = Some(value);
            format!("无法修改: {err}")
        }
    };
}

pub(super) fn draw_settings(frame: &mut ratatui::Frame, app: &mut App) {
    let (main, log_area) = split_with_log(frame.size());
    let rows = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(main);

    let pref = app.preferences().cloned().unwrap_or_default();
    let editing = app.settings_state.selected().zip(app.settings_edit.as_ref());
    let items: Vec<ListItem> = PREFERENCE_FIELDS
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let value = match editing {
                Some((selected, buffer)) if selected == i => format!("{buffer}_"),
                _ => pref.value_of(field).unwrap_or_default(),
            };
            ListItem::new(Line::from(vec![
                Span::raw(format!("{:<28}", field_title(field))),
                Span::styled(value, Style::default().fg(Color::Cyan)),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("阅读设置"))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("> ");
    frame.render_stateful_widget(list, rows[0], &mut app.settings_state);
    render_status(frame, rows[1], app);
    render_log_box(frame, log_area, app);
}
