//! Process stack and register pane

use super::{pane_block, visible_items};
use crate::snapshot::Snapshot;
use crate::ui::theme::DEFAULT_THEME;
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{List, ListItem},
    Frame,
};

fn field(name: &str, value: String) -> ListItem<'static> {
    ListItem::new(Line::from(vec![
        Span::styled(format!("    {:<8}", name), Style::default().fg(DEFAULT_THEME.comment)),
        Span::styled(value, Style::default().fg(DEFAULT_THEME.address)),
    ]))
}

/// Render the process stack (innermost first) followed by the registers
pub fn render_processes_pane(
    frame: &mut Frame,
    area: Rect,
    snapshot: &Snapshot,
    is_focused: bool,
    scroll_offset: &mut usize,
) {
    let title = format!(" Processes (depth {}) ", snapshot.processes.len());
    let block = pane_block(&title, is_focused);
    let mut items = Vec::new();

    if snapshot.processes.is_empty() {
        items.push(ListItem::new("(no main process)").style(Style::default().fg(DEFAULT_THEME.comment)));
    }

    for (depth, process) in snapshot.processes.iter().enumerate().rev() {
        let role = if depth == 0 { "main" } else { "sub" };
        items.push(ListItem::new(Line::from(vec![
            Span::styled("▸ ", Style::default().fg(DEFAULT_THEME.secondary)),
            Span::styled(
                format!("#{} {} │ ", depth, role),
                Style::default().fg(DEFAULT_THEME.comment),
            ),
            Span::styled(
                process.name.clone(),
                Style::default()
                    .fg(DEFAULT_THEME.process)
                    .add_modifier(Modifier::BOLD),
            ),
        ])));
        items.push(field("task", format!("0x{:06x}", process.task_addr)));
        items.push(field("entry", format!("0x{:06x}", process.entry_point)));
        items.push(field(
            "stack",
            format!(
                "0x{:06x}-0x{:06x} sp=0x{:06x}",
                process.stack_lower, process.stack_upper, process.initial_stack_pointer
            ),
        ));
        items.push(field(
            "args",
            format!("{} @ 0x{:06x}", process.argument_length, process.argument_pointer),
        ));
        if let Some(launch) = process.launch_entry {
            items.push(field("launch", format!("0x{:06x}", launch)));
        }
    }

    items.push(ListItem::new(""));
    items.push(ListItem::new(Line::from(vec![
        Span::styled("▸ ", Style::default().fg(DEFAULT_THEME.secondary)),
        Span::styled(
            format!("Registers │ pc=0x{:06x}", snapshot.pc),
            Style::default().fg(DEFAULT_THEME.comment),
        ),
    ])));
    let (data, address) = snapshot.registers.split_at(8);
    for i in 0..8 {
        items.push(ListItem::new(Line::from(vec![
            Span::styled(format!("    d{} ", i), Style::default().fg(DEFAULT_THEME.comment)),
            Span::styled(format!("{:08x}  ", data[i]), Style::default().fg(DEFAULT_THEME.fg)),
            Span::styled(format!("a{} ", i), Style::default().fg(DEFAULT_THEME.comment)),
            Span::styled(format!("{:08x}", address[i]), Style::default().fg(DEFAULT_THEME.fg)),
        ])));
    }

    let list = List::new(visible_items(items, area, scroll_offset)).block(block);
    frame.render_widget(list, area);
}
