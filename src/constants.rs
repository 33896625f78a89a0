pub const FRAMES_MAX: usize = 64;
pub const MAX_STACK_SIZE: usize = FRAMES_MAX * (u8::MAX as usize + 1);

// First collection fires once a megabyte of objects is live; afterwards the
// threshold tracks the surviving heap.
pub const GC_NEXT_GC_INITIAL: usize = 1024 * 1024;
pub const GC_GROWTH_FACTOR: usize = 2;
