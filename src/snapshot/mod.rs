// Snapshot history and log capture for the inspector

use crate::cpu::Cpu;
use crate::emulator::controller::ProcessController;
use crate::emulator::traps::TrapTable;
use crate::memory::label::LabelRange;
use crate::memory::{Address, AddressSpace};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::sync::{Arc, Mutex};

/// A captured log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: Level,
    pub target: String,
    pub text: String,
}

/// Shared, append-only buffer of captured log lines
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: LogLine) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }

    pub fn len(&self) -> usize {
        self.lines.lock().map(|lines| lines.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the first `end` lines
    pub fn lines_until(&self, end: usize) -> Vec<LogLine> {
        self.lines
            .lock()
            .map(|lines| lines[..end.min(lines.len())].to_vec())
            .unwrap_or_default()
    }
}

/// `log` backend recording into a [`LogBuffer`], optionally echoing to stderr
#[derive(Debug)]
pub struct LogCapture {
    buffer: LogBuffer,
    level: LevelFilter,
    echo: bool,
}

impl LogCapture {
    pub fn new(buffer: LogBuffer, level: LevelFilter, echo: bool) -> Self {
        LogCapture {
            buffer,
            level,
            echo,
        }
    }

    /// Install as the global logger
    pub fn install(self) -> Result<(), log::SetLoggerError> {
        let level = self.level;
        log::set_logger(Box::leak(Box::new(self)))?;
        log::set_max_level(level);
        Ok(())
    }
}

impl Log for LogCapture {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = LogLine {
            level: record.level(),
            target: record.target().to_string(),
            text: record.args().to_string(),
        };
        if self.echo {
            eprintln!("{:>5} {:>9}: {}", line.level, line.target, line.text);
        }
        self.buffer.push(line);
    }

    fn flush(&self) {}
}

/// One process stack entry as seen at snapshot time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessView {
    pub name: String,
    pub task_addr: Address,
    pub entry_point: Address,
    pub initial_stack_pointer: Address,
    pub stack_lower: Address,
    pub stack_upper: Address,
    pub argument_length: u32,
    pub argument_pointer: Address,
    pub launch_entry: Option<Address>,
}

/// One live allocation as seen at snapshot time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocView {
    pub address: Address,
    pub size: u32,
    pub name: String,
}

/// Emulator state captured after a controller event
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub event: String,
    pub processes: Vec<ProcessView>, // main process first
    pub allocations: Vec<AllocView>,
    pub labels: Vec<LabelRange>,
    pub registers: [u32; 16],
    pub pc: Address,
    pub traps_in_use: usize,
    pub log_end: usize,
    pub is_error: bool,
}

impl Snapshot {
    pub fn capture(
        event: String,
        controller: &ProcessController,
        space: &AddressSpace,
        cpu: &dyn Cpu,
        traps: &TrapTable,
        log_end: usize,
    ) -> Self {
        let processes = controller
            .stack()
            .iter()
            .map(|p| ProcessView {
                name: p.name.clone(),
                task_addr: p.task_addr(),
                entry_point: p.entry_point,
                initial_stack_pointer: p.initial_stack_pointer,
                stack_lower: p.stack_lower(),
                stack_upper: p.stack_upper(),
                argument_length: p.argument_length,
                argument_pointer: p.argument_pointer,
                launch_entry: p.launch().and_then(|tr| tr.entry().ok()),
            })
            .collect();
        let allocations = space
            .alloc
            .live_blocks()
            .into_iter()
            .map(|(allocation, name)| AllocView {
                address: allocation.address(),
                size: allocation.size(),
                name: name.to_string(),
            })
            .collect();

        Snapshot {
            event,
            processes,
            allocations,
            labels: space.labels.iter().cloned().collect(),
            registers: cpu.gprs(),
            pc: cpu.pc(),
            traps_in_use: traps.len(),
            log_end,
            is_error: false,
        }
    }

    /// Estimate the memory usage of this snapshot in bytes
    pub fn estimated_size(&self) -> usize {
        // Rough per-entry costs including the strings
        let processes = self.processes.len() * 96;
        let allocations = self.allocations.len() * 48;
        let labels = self.labels.len() * 48;

        std::mem::size_of::<Snapshot>() + self.event.len() + processes + allocations + labels
    }
}

/// Manages the snapshot history
#[derive(Debug)]
pub struct SnapshotManager {
    snapshots: Vec<Snapshot>,
    max_memory: usize,
    current_memory: usize,
    dropped: usize,
}

impl SnapshotManager {
    pub fn new(max_memory: usize) -> Self {
        SnapshotManager {
            snapshots: Vec::new(),
            max_memory,
            current_memory: 0,
            dropped: 0,
        }
    }

    /// Add a snapshot to history
    pub fn push(&mut self, snapshot: Snapshot) -> Result<(), String> {
        let snapshot_size = snapshot.estimated_size();

        if self.current_memory + snapshot_size > self.max_memory {
            self.dropped += 1;
            return Err(format!(
                "Snapshot memory limit exceeded: {} + {} > {}",
                self.current_memory, snapshot_size, self.max_memory
            ));
        }

        self.current_memory += snapshot_size;
        self.snapshots.push(snapshot);
        Ok(())
    }

    /// Get a snapshot by index
    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.snapshots.get(index)
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    /// Get the number of snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Snapshots rejected because of the memory limit
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn memory_usage(&self) -> usize {
        self.current_memory
    }

    pub fn memory_limit(&self) -> usize {
        self.max_memory
    }
}
