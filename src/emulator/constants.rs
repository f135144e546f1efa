// Constants for the emulator host

/// First address handed out by the allocator; everything below is reserved
pub const ALLOC_BASE: u32 = 0x0000_1000;

/// Size of the labeled zero page (the two longs at address 0 and 4)
pub const ZERO_PAGE_SIZE: u32 = 8;

/// Size of the guard range whose base is loaded into A2/A5/A6 for old DOS code
pub const DOS_GUARD_SIZE: u32 = 0x0001_0000;

/// Size of the per-process task record
pub const TASK_RECORD_SIZE: u32 = 16;

/// Bytes between the initial stack pointer and the stack top: return address
/// followed by the stack size long
pub const INITIAL_FRAME_SIZE: u32 = 8;

/// Smallest stack a process may be created with
pub const MIN_STACK_SIZE: u32 = 1024;
