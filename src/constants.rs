pub const UINT8_COUNT: usize = u8::MAX as usize + 1;

pub const FRAMES_MAX: usize = 64;
pub const MAX_STACK_SIZE: usize = FRAMES_MAX * UINT8_COUNT;

pub const HEAP_GROW_FACTOR: usize = 2;
pub const FIRST_GC_THRESHOLD: usize = 1024 * 1024;
