/// The page size of the emulated host, in bytes
pub const PAGE_SIZE: usize = 4096;
/// The maximum number of segments a single `SEND` command may carry
pub const MAX_SEGMENTS: u32 = 1024;
/// The number of physical frames the emulated host may hand out by default
pub const EMULATED_FRAME_LIMIT: usize = 16384; // 64 MiB
