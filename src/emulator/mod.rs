//! The emulator host
//!
//! Everything between the CPU and the guest program's view of the OS:
//!
//! - [`engine`]: the [`Emulator`] run driver tying the pieces together
//! - [`controller`]: the process stack and the sub-process launch protocol
//! - [`process`]: guest process blocks (task record, arguments, stack)
//! - [`trampoline`]: synthesized guest code used to enter and leave processes
//! - [`traps`]: the A-line trap table
//! - [`attribution`]: memory fault to label attribution
//! - [`errors`]: the [`EmuError`] type shared by all of the above
//! - [`config`] and [`constants`]: machine settings and fixed layout values
//!
//! [`Emulator`]: engine::Emulator
//! [`EmuError`]: errors::EmuError

pub mod attribution;
pub mod config;
pub mod constants;
pub mod controller;
pub mod engine;
pub mod errors;
pub mod process;
pub mod trampoline;
pub mod traps;

pub use config::EmuConfig;
pub use engine::{Emulator, RunOutcome};
pub use errors::EmuError;
