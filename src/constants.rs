pub(crate) const MAGIC: u8 = 0xBD;
pub(crate) const FORMAT_VERSION: u8 = 1;

pub(crate) const FIRST_USER_TYPE_ID: u32 = 64;
pub(crate) const MAX_USER_TYPE_ID: u32 = 4096;

// growth switches from 2x to 1.5x past this point
pub(crate) const LARGE_BUFFER_THRESHOLD: usize = 100 * 1024 * 1024;

pub(crate) const DEFAULT_STREAM_CHUNK: usize = 4096;
pub(crate) const DEFAULT_MAX_DEPTH: u32 = 256;

pub(crate) const MAX_META_STRING_LEN: usize = 255;
