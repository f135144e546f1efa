//! Emulator configuration

/// Settings for one emulated machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmuConfig {
    /// Guest RAM in KiB
    pub ram_size_kib: u32,
    /// Stack size for processes created without an explicit size
    pub stack_size: u32,
    /// Instructions the CPU may execute between two traps
    pub max_steps: u64,
    /// Memory budget for the snapshot history in bytes
    pub snapshot_limit: usize,
}

impl EmuConfig {
    pub fn ram_size(&self) -> u32 {
        self.ram_size_kib.saturating_mul(1024)
    }
}

impl Default for EmuConfig {
    fn default() -> Self {
        EmuConfig {
            ram_size_kib: 1024,
            stack_size: 8 * 1024,
            max_steps: 1_000_000,
            snapshot_limit: 64 * 1024 * 1024,
        }
    }
}
