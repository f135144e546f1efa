//! Allocation and label panes

use super::{pane_block, visible_items};
use crate::memory::label::LabelRange;
use crate::snapshot::AllocView;
use crate::ui::theme::DEFAULT_THEME;
use ratatui::{
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::{List, ListItem},
    Frame,
};

fn empty_item() -> ListItem<'static> {
    ListItem::new("(empty)").style(Style::default().fg(DEFAULT_THEME.comment))
}

/// Render the live allocations, lowest address first
pub fn render_allocations_pane(
    frame: &mut Frame,
    area: Rect,
    allocations: &[AllocView],
    is_focused: bool,
    scroll_offset: &mut usize,
) {
    let total: u64 = allocations.iter().map(|a| a.size as u64).sum();
    let title = format!(" Allocations ({} blocks, {} bytes) ", allocations.len(), total);
    let block = pane_block(&title, is_focused);

    let items: Vec<ListItem> = if allocations.is_empty() {
        vec![empty_item()]
    } else {
        allocations
            .iter()
            .map(|a| {
                ListItem::new(Line::from(vec![
                    Span::styled(
                        format!("0x{:06x} ", a.address),
                        Style::default().fg(DEFAULT_THEME.address),
                    ),
                    Span::styled(
                        format!("{:>8} ", a.size),
                        Style::default().fg(DEFAULT_THEME.fg),
                    ),
                    Span::styled(a.name.clone(), Style::default().fg(DEFAULT_THEME.label)),
                ]))
            })
            .collect()
    };

    let list = List::new(visible_items(items, area, scroll_offset)).block(block);
    frame.render_widget(list, area);
}

/// Render the registered labels
pub fn render_labels_pane(
    frame: &mut Frame,
    area: Rect,
    labels: &[LabelRange],
    is_focused: bool,
    scroll_offset: &mut usize,
) {
    let block = pane_block(" Labels ", is_focused);

    let mut sorted: Vec<&LabelRange> = labels.iter().collect();
    sorted.sort_by_key(|range| (range.start, range.length));

    let items: Vec<ListItem> = if sorted.is_empty() {
        vec![empty_item()]
    } else {
        sorted
            .into_iter()
            .map(|range| {
                ListItem::new(Line::from(vec![
                    Span::styled(
                        format!("0x{:06x}-0x{:06x} ", range.start, range.end()),
                        Style::default().fg(DEFAULT_THEME.address),
                    ),
                    Span::styled(range.name.clone(), Style::default().fg(DEFAULT_THEME.label)),
                ]))
            })
            .collect()
    };

    let list = List::new(visible_items(items, area, scroll_offset)).block(block);
    frame.render_widget(list, area);
}
