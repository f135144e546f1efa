//! Main TUI application state and logic

use crate::snapshot::{LogLine, Snapshot, SnapshotManager};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use ratatui::{
    backend::Backend,
    layout::{Constraint, Direction, Layout},
    Frame, Terminal,
};
use std::io;
use std::time::{Duration, Instant};

/// Which pane is currently focused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusedPane {
    Processes,
    Allocations,
    Labels,
    Log,
}

impl FocusedPane {
    /// Move focus to the next pane (clockwise: processes -> log -> allocations -> labels)
    pub fn next(self) -> Self {
        match self {
            FocusedPane::Processes => FocusedPane::Log,
            FocusedPane::Log => FocusedPane::Allocations,
            FocusedPane::Allocations => FocusedPane::Labels,
            FocusedPane::Labels => FocusedPane::Processes,
        }
    }

    /// Move focus to the previous pane (counter-clockwise)
    pub fn prev(self) -> Self {
        match self {
            FocusedPane::Processes => FocusedPane::Labels,
            FocusedPane::Log => FocusedPane::Processes,
            FocusedPane::Allocations => FocusedPane::Log,
            FocusedPane::Labels => FocusedPane::Allocations,
        }
    }
}

/// The main application state
pub struct App {
    /// Snapshot history of the finished run
    pub history: SnapshotManager,

    /// Every captured log line; each snapshot shows a prefix of it
    pub log: Vec<LogLine>,

    /// Index of the snapshot on screen
    pub position: usize,

    /// Currently focused pane
    pub focused_pane: FocusedPane,

    /// Per-pane scroll offsets
    pub processes_scroll: usize,
    pub allocations_scroll: usize,
    pub labels_scroll: usize,
    pub log_scroll: usize,

    /// Whether the app should quit
    pub should_quit: bool,

    /// Status message to display
    pub status_message: String,

    /// Whether auto-play mode is active
    pub is_playing: bool,

    /// Last time a step was taken in play mode
    pub last_play_time: Instant,
}

impl App {
    pub fn new(history: SnapshotManager, log: Vec<LogLine>) -> Self {
        let status_message = match history.dropped() {
            0 => String::from("Ready!"),
            n => format!("Ready! ({} snapshot(s) dropped at the memory limit)", n),
        };
        App {
            history,
            log,
            position: 0,
            focused_pane: FocusedPane::Processes,
            processes_scroll: 0,
            allocations_scroll: 0,
            labels_scroll: 0,
            log_scroll: usize::MAX,
            should_quit: false,
            status_message,
            is_playing: false,
            last_play_time: Instant::now(),
        }
    }

    pub fn current(&self) -> Option<&Snapshot> {
        self.history.get(self.position)
    }

    /// Run the TUI application
    pub fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> io::Result<()> {
        loop {
            terminal.draw(|f| self.render(f))?;

            if self.should_quit {
                break;
            }

            if self.is_playing && self.last_play_time.elapsed() >= Duration::from_millis(500) {
                if !self.step_forward() {
                    self.is_playing = false;
                    self.status_message = "Playback complete".to_string();
                }
                self.last_play_time = Instant::now();
            }

            // Poll with a timeout so auto-play keeps advancing
            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key_event(key);
                    }
                }
            }
        }

        Ok(())
    }

    fn render(&mut self, frame: &mut Frame) {
        let size = frame.area();

        let main_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(1)])
            .split(size);

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(main_chunks[0]);

        // Left column: processes (top) | log (bottom)
        let left_rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(columns[0]);

        // Right column: allocations (top) | labels (bottom)
        let right_rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(columns[1]);

        let total = self.history.len();
        let Some(snapshot) = self.history.get(self.position) else {
            super::panes::render_status_bar(
                frame,
                main_chunks[1],
                "No snapshots recorded",
                0,
                total.max(1),
                true,
                false,
            );
            return;
        };

        super::panes::render_processes_pane(
            frame,
            left_rows[0],
            snapshot,
            self.focused_pane == FocusedPane::Processes,
            &mut self.processes_scroll,
        );

        let log_end = snapshot.log_end.min(self.log.len());
        super::panes::render_log_pane(
            frame,
            left_rows[1],
            &self.log[..log_end],
            self.focused_pane == FocusedPane::Log,
            &mut self.log_scroll,
        );

        super::panes::render_allocations_pane(
            frame,
            right_rows[0],
            &snapshot.allocations,
            self.focused_pane == FocusedPane::Allocations,
            &mut self.allocations_scroll,
        );

        super::panes::render_labels_pane(
            frame,
            right_rows[1],
            &snapshot.labels,
            self.focused_pane == FocusedPane::Labels,
            &mut self.labels_scroll,
        );

        let message = format!("{} │ {}", snapshot.event, self.status_message);
        super::panes::render_status_bar(
            frame,
            main_chunks[1],
            &message,
            self.position,
            total,
            snapshot.is_error,
            self.is_playing,
        );
    }

    fn scroll(&mut self) -> &mut usize {
        match self.focused_pane {
            FocusedPane::Processes => &mut self.processes_scroll,
            FocusedPane::Allocations => &mut self.allocations_scroll,
            FocusedPane::Labels => &mut self.labels_scroll,
            FocusedPane::Log => &mut self.log_scroll,
        }
    }

    fn handle_key_event(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Char('Q') => {
                self.should_quit = true;
            }
            KeyCode::Tab => {
                self.focused_pane = self.focused_pane.next();
            }
            KeyCode::BackTab => {
                self.focused_pane = self.focused_pane.prev();
            }
            KeyCode::Left => {
                self.is_playing = false;
                self.step_backward();
            }
            KeyCode::Right => {
                self.is_playing = false;
                if !self.step_forward() {
                    self.status_message = "Already at the last event".to_string();
                }
            }
            KeyCode::Up => {
                let scroll = self.scroll();
                *scroll = scroll.saturating_sub(1);
            }
            KeyCode::Down => {
                let scroll = self.scroll();
                *scroll = scroll.saturating_add(1);
            }
            KeyCode::Char(' ') => {
                self.is_playing = !self.is_playing;
                self.status_message = if self.is_playing {
                    "Playing...".to_string()
                } else {
                    "Paused".to_string()
                };
            }
            KeyCode::Enter => {
                self.is_playing = false;
                self.position = self.history.len().saturating_sub(1);
                self.status_message = "Jumped to end".to_string();
                self.log_scroll = usize::MAX;
            }
            KeyCode::Backspace => {
                self.is_playing = false;
                self.position = 0;
                self.status_message = "Jumped to start".to_string();
                self.log_scroll = usize::MAX;
            }
            _ => {}
        }
    }

    /// Advance one event. Returns `false` at the end of the history.
    fn step_forward(&mut self) -> bool {
        if self.position + 1 >= self.history.len() {
            return false;
        }
        self.position += 1;
        self.status_message = "Stepped forward".to_string();
        // Auto-scroll log to bottom
        self.log_scroll = usize::MAX;
        true
    }

    fn step_backward(&mut self) {
        if self.position == 0 {
            self.status_message = "Already at the first event".to_string();
            return;
        }
        self.position -= 1;
        self.status_message = "Stepped backward".to_string();
        self.log_scroll = usize::MAX;
    }
}
