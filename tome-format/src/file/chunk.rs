use std::io::Read;

use crate::compression::Compression;

/// Accumulates item bytes until a chunk is big enough to compress and write.
#[derive(Debug)]
pub(crate) struct ChunkBuilder {
    compression: Compression,
    /// Chunk id, reserved when the first bytes arrive.
    id: Option<u64>,
    buf: Vec<u8>,
}

/// Where an item's bytes ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    pub(crate) chunk: u64,
    pub(crate) offset: u64,
    pub(crate) length: u64,
}

/// A chunk ready to be compressed and written.
#[derive(Debug)]
pub(crate) struct SealedChunk {
    pub(crate) id: u64,
    pub(crate) compression: Compression,
    pub(crate) data: Vec<u8>,
}

impl ChunkBuilder {
    pub(crate) fn new(compression: Compression) -> ChunkBuilder {
        ChunkBuilder {
            compression,
            id: None,
            buf: Vec::new(),
        }
    }

    #[inline(always)]
    fn reserve(&mut self, next_id: &mut u64) -> u64 {
        *self.id.get_or_insert_with(|| {
            let id = *next_id;
            *next_id += 1;
            id
        })
    }

    pub(crate) fn append(&mut self, bytes: &[u8], next_id: &mut u64) -> Placement {
        let chunk = self.reserve(next_id);
        let offset = self.buf.len() as u64;
        self.buf.extend_from_slice(bytes);
        Placement {
            chunk,
            offset,
            length: bytes.len() as u64,
        }
    }

    /// Streams at most `limit` bytes from `reader` into the chunk.
    ///
    /// The returned placement's length is what was actually read, which may be
    /// short if the reader ran out early.
    pub(crate) fn append_from<R: Read>(
        &mut self,
        reader: R,
        limit: u64,
        next_id: &mut u64,
    ) -> std::io::Result<Placement> {
        let chunk = self.reserve(next_id);
        let offset = self.buf.len() as u64;
        let length = std::io::copy(&mut reader.take(limit), &mut self.buf)?;
        Ok(Placement {
            chunk,
            offset,
            length,
        })
    }

    #[inline(always)]
    pub(crate) fn is_full(&self, min_chunk_size: u32) -> bool {
        self.buf.len() as u64 >= min_chunk_size as u64
    }

    /// Hands over the current chunk, if anything has been reserved.
    pub(crate) fn seal(&mut self) -> Option<SealedChunk> {
        let id = self.id.take()?;
        Some(SealedChunk {
            id,
            compression: self.compression,
            data: std::mem::take(&mut self.buf),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_reserved_lazily() {
        let mut next_id = 0;
        let mut compressed = ChunkBuilder::new(Compression::Zstd);
        let mut stored = ChunkBuilder::new(Compression::Stored);

        assert!(compressed.seal().is_none());

        let a = stored.append(b"abc", &mut next_id);
        let b = compressed.append(b"defg", &mut next_id);
        let c = stored.append(b"hi", &mut next_id);

        assert_eq!(a, Placement { chunk: 0, offset: 0, length: 3 });
        assert_eq!(b, Placement { chunk: 1, offset: 0, length: 4 });
        assert_eq!(c, Placement { chunk: 0, offset: 3, length: 2 });

        assert!(stored.is_full(5));
        let sealed = stored.seal().unwrap();
        assert_eq!(sealed.id, 0);
        assert_eq!(sealed.data, b"abchi");

        let d = stored.append(b"j", &mut next_id);
        assert_eq!(d.chunk, 2);
    }

    #[test]
    fn append_from_stops_at_limit() {
        let mut next_id = 0;
        let mut builder = ChunkBuilder::new(Compression::Stored);
        let placement = builder
            .append_from(&b"0123456789"[..], 4, &mut next_id)
            .unwrap();
        assert_eq!(placement.length, 4);

        let short = builder.append_from(&b"ab"[..], 10, &mut next_id).unwrap();
        assert_eq!(short, Placement { chunk: 0, offset: 4, length: 2 });
    }
}
