//! Log pane rendering

use super::{pane_block, visible_items};
use crate::snapshot::LogLine;
use crate::ui::theme::DEFAULT_THEME;
use log::Level;
use ratatui::{
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::{List, ListItem, Padding, Paragraph},
    Frame,
};

fn level_style(level: Level) -> Style {
    let color = match level {
        Level::Error => DEFAULT_THEME.error,
        Level::Warn => DEFAULT_THEME.warning,
        Level::Info => DEFAULT_THEME.fg,
        Level::Debug | Level::Trace => DEFAULT_THEME.comment,
    };
    Style::default().fg(color)
}

/// Render the log lines written up to the current snapshot
pub fn render_log_pane(
    frame: &mut Frame,
    area: Rect,
    lines: &[LogLine],
    is_focused: bool,
    scroll_offset: &mut usize,
) {
    let block = pane_block(" Log ", is_focused);

    if lines.is_empty() {
        let paragraph = Paragraph::new("(no output)")
            .block(block)
            .style(Style::default().fg(DEFAULT_THEME.comment));
        frame.render_widget(paragraph, area);
        return;
    }

    let items: Vec<ListItem> = lines
        .iter()
        .map(|line| {
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:>5} ", line.level), level_style(line.level)),
                Span::styled(
                    format!("{:<9} ", line.target),
                    Style::default().fg(DEFAULT_THEME.comment),
                ),
                Span::styled(line.text.clone(), level_style(line.level)),
            ]))
        })
        .collect();

    let list = List::new(visible_items(items, area, scroll_offset))
        .block(block.padding(Padding::new(1, 0, 0, 0)));
    frame.render_widget(list, area);
}
