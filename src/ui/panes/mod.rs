//! TUI pane rendering modules
//!
//! # Pane Modules
//!
//! - [`processes`]: the process stack and CPU registers of the current snapshot
//! - [`memory`]: live allocations and labeled ranges
//! - [`log`]: captured log lines up to the current snapshot
//! - [`status`]: status bar with keybindings and history position
//!
//! Each pane module exports a `render_*` function taking the frame, its area,
//! the data to show, the focus flag and a scroll offset it clamps in place.

pub mod log;
pub mod memory;
pub mod processes;
pub mod status;

pub use self::log::render_log_pane;
pub use memory::{render_allocations_pane, render_labels_pane};
pub use processes::render_processes_pane;
pub use status::render_status_bar;

use crate::ui::theme::DEFAULT_THEME;
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    widgets::{Block, Borders, ListItem},
};

/// Bordered block with the focus-dependent border style
fn pane_block(title: &str, is_focused: bool) -> Block<'_> {
    let border_style = if is_focused {
        Style::default()
            .fg(DEFAULT_THEME.border_focused)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(DEFAULT_THEME.border_normal)
    };

    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(border_style)
}

/// Clamp `scroll_offset` and keep only the items that fit into `area`
fn visible_items<'a>(items: Vec<ListItem<'a>>, area: Rect, scroll_offset: &mut usize) -> Vec<ListItem<'a>> {
    let total_items = items.len();
    let visible_height = area.height.saturating_sub(2).max(1) as usize; // borders

    if total_items > visible_height {
        let max_scroll = total_items - visible_height;
        *scroll_offset = (*scroll_offset).min(max_scroll);
    } else {
        *scroll_offset = 0;
    }

    items
        .into_iter()
        .skip(*scroll_offset)
        .take(visible_height)
        .collect()
}
