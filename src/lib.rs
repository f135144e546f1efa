//! # Introduction
//!
//! amiexec hosts AmigaOS-style programs in user mode. A CPU core runs guest
//! code; the host provides the memory model, an allocator with named blocks,
//! fault attribution and the process controller that launches nested
//! sub-processes through synthesized trampolines. Every controller event is
//! captured as a snapshot that can be browsed in a terminal UI built with
//! [ratatui](https://docs.rs/ratatui).
//!
//! ## Pipeline
//!
//! ```text
//! Cpu ⇄ Emulator (traps, processes) → Snapshots → TUI
//!          │
//!          └── AddressSpace (memory, allocator, labels)
//! ```
//!
//! 1. [`cpu`] — the [`cpu::Cpu`] trait, a small 68000 assembler and a CPU
//!    executing exactly that instruction subset.
//! 2. [`memory`] — flat big-endian guest memory, the allocator and the label
//!    registry.
//! 3. [`emulator`] — trampolines, the trap table, processes, the controller
//!    and the [`emulator::Emulator`] run driver.
//! 4. [`snapshot`] — snapshot history with a memory limit and a `log` backend
//!    that keeps the log next to it.
//! 5. [`ui`] — ratatui-based inspector; not part of the stable library API.

pub mod cpu;
pub mod emulator;
pub mod memory;
pub mod snapshot;
pub mod ui;
