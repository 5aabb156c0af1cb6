/// Default HTTP port of the transfer server
pub const DEFAULT_TRANSFER_PORT: u16 = 56934;

/// Read size when streaming a file from disk (256KB)
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Maximum length of a received file name in bytes
pub const MAX_FILENAME_LENGTH: usize = 255;
