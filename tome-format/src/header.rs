use std::num::NonZeroU64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TomeHeader {
    pub(crate) magic_bytes: [u8; 4],
    pub(crate) version: u8,
    pub(crate) min_chunk_size: u32,
    pub(crate) trailer: Option<NonZeroU64>,
}

// Make some attempt to not accidentally load plain text files,
// and also make it break almost immediately in any UTF-8 compliant text parser.
pub(crate) const MAGIC_BYTES: &[u8; 4] = b"\xffTOM";

pub(crate) const VERSION: u8 = 1;

impl TomeHeader {
    pub(crate) const SIZE: usize = 24;

    pub(crate) fn new(min_chunk_size: u32) -> TomeHeader {
        TomeHeader {
            magic_bytes: *MAGIC_BYTES,
            version: VERSION,
            min_chunk_size,
            trailer: None,
        }
    }
}
