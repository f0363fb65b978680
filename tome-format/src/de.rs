use std::io::{Cursor, Read};
use std::num::NonZeroU64;

use byteorder::{LittleEndian, ReadBytesExt};
use fastvlq::decode_vu64_slice;

use crate::{
    compression::Compression,
    header::{TomeHeader, MAGIC_BYTES},
    record::{
        ChunkRecord, EntryRecord, EntryTarget, Trailer, ENTRY_FLAG_COMPRESS, ENTRY_FLAG_INDEX,
        ENTRY_KIND_CONTENT, ENTRY_KIND_REDIRECT,
    },
};

pub(crate) type SliceReader<'a> = Cursor<&'a [u8]>;

fn invalid_data<E>(error: E) -> std::io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    std::io::Error::new(std::io::ErrorKind::InvalidData, error)
}

/// Read a fastvlq-encoded u64 from the current cursor position.
fn read_vu64(reader: &mut SliceReader<'_>) -> std::io::Result<u64> {
    let pos = reader.position() as usize;
    let data = reader.get_ref();
    let (value, len) = data
        .get(pos..)
        .and_then(|slice| decode_vu64_slice(slice))
        .ok_or_else(|| invalid_data("truncated variable-length integer"))?;
    reader.set_position((pos + len) as u64);
    Ok(value)
}

/// Guards allocations against lengths that cannot fit in what is left.
fn read_len(reader: &mut SliceReader<'_>) -> std::io::Result<usize> {
    let len = read_vu64(reader)?;
    let remaining = reader.get_ref().len() as u64 - reader.position();
    if len > remaining {
        return Err(invalid_data(format!(
            "length {} exceeds remaining {} bytes",
            len, remaining
        )));
    }
    Ok(len as usize)
}

pub(crate) trait DeserializeOwned {
    fn deserialize_owned(reader: &mut SliceReader<'_>) -> std::io::Result<Self>
    where
        Self: Sized;
}

impl<T: DeserializeOwned> DeserializeOwned for Vec<T> {
    fn deserialize_owned(reader: &mut SliceReader<'_>) -> std::io::Result<Self> {
        let len = read_len(reader)?;
        let mut buf = Vec::with_capacity(len);
        for _ in 0..len {
            buf.push(T::deserialize_owned(reader)?);
        }
        Ok(buf)
    }
}

impl DeserializeOwned for String {
    fn deserialize_owned(reader: &mut SliceReader<'_>) -> std::io::Result<Self> {
        let len = read_len(reader)?;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(invalid_data)
    }
}

impl DeserializeOwned for u64 {
    fn deserialize_owned(reader: &mut SliceReader<'_>) -> std::io::Result<Self> {
        read_vu64(reader)
    }
}

impl DeserializeOwned for Compression {
    fn deserialize_owned(reader: &mut SliceReader<'_>) -> std::io::Result<Self> {
        Ok(Compression::from_id_lossy(reader.read_u8()?))
    }
}

impl DeserializeOwned for ChunkRecord {
    fn deserialize_owned(reader: &mut SliceReader<'_>) -> std::io::Result<Self> {
        Ok(ChunkRecord {
            compression: Compression::deserialize_owned(reader)?,
            offset: reader.read_u64::<LittleEndian>()?,
            length: reader.read_u64::<LittleEndian>()?,
            decompressed_length: reader.read_u64::<LittleEndian>()?,
        })
    }
}

impl DeserializeOwned for EntryRecord {
    fn deserialize_owned(reader: &mut SliceReader<'_>) -> std::io::Result<Self> {
        let kind = reader.read_u8()?;
        let flags = reader.read_u8()?;
        let url = String::deserialize_owned(reader)?;
        let title = String::deserialize_owned(reader)?;

        let target = match kind {
            ENTRY_KIND_CONTENT => EntryTarget::Content {
                mime_type: String::deserialize_owned(reader)?,
                chunk: read_vu64(reader)?,
                offset: read_vu64(reader)?,
                length: read_vu64(reader)?,
            },
            ENTRY_KIND_REDIRECT => EntryTarget::Redirect {
                target: String::deserialize_owned(reader)?,
            },
            _ => {
                return Err(invalid_data(format!(
                    "invalid or unsupported entry kind: {}",
                    kind
                )))
            }
        };

        Ok(EntryRecord {
            url,
            title,
            index: flags & ENTRY_FLAG_INDEX != 0,
            compress: flags & ENTRY_FLAG_COMPRESS != 0,
            target,
        })
    }
}

impl DeserializeOwned for TomeHeader {
    fn deserialize_owned(reader: &mut SliceReader<'_>) -> std::io::Result<Self> {
        let mut magic_bytes = [0u8; 4];
        reader.read_exact(&mut magic_bytes)?;

        if &magic_bytes != MAGIC_BYTES {
            return Err(invalid_data("Magic bytes invalid"));
        }

        let version = reader.read_u8()?;
        reader.read_exact(&mut [0u8; 3])?; // skip reserved1
        let min_chunk_size = reader.read_u32::<LittleEndian>()?;
        reader.read_exact(&mut [0u8; 4])?; // skip reserved2
        let trailer = reader.read_u64::<LittleEndian>()?;

        Ok(TomeHeader {
            magic_bytes,
            version,
            min_chunk_size,
            trailer: NonZeroU64::new(trailer),
        })
    }
}

impl DeserializeOwned for Trailer {
    fn deserialize_owned(reader: &mut SliceReader<'_>) -> std::io::Result<Self> {
        let start = reader.position();
        let trailer = Trailer {
            main_page: String::deserialize_owned(reader)?,
            language: String::deserialize_owned(reader)?,
            chunks: <Vec<ChunkRecord>>::deserialize_owned(reader)?,
            entries: <Vec<EntryRecord>>::deserialize_owned(reader)?,
            titles: <Vec<u64>>::deserialize_owned(reader)?,
        };

        if trailer
            .entries
            .windows(2)
            .any(|pair| pair[0].url >= pair[1].url)
        {
            return Err(invalid_data("entries are not sorted by identifier"));
        }
        if trailer
            .titles
            .iter()
            .any(|i| *i >= trailer.entries.len() as u64)
        {
            return Err(invalid_data("title index points past the last entry"));
        }

        tracing::debug!(
            start = format_args!("{:#x}", start),
            end = format_args!("{:#x}", reader.position()),
            chunks = trailer.chunks.len(),
            entries = trailer.entries.len(),
            "deserialized Trailer"
        );

        Ok(trailer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ser::Serialize;

    fn sample() -> Trailer {
        let mut trailer = Trailer {
            main_page: "A/home".into(),
            language: "eng".into(),
            chunks: vec![ChunkRecord {
                compression: Compression::Zstd,
                offset: 24,
                length: 10,
                decompressed_length: 40,
            }],
            entries: vec![
                EntryRecord {
                    url: "A/home".into(),
                    title: "Home".into(),
                    index: true,
                    compress: true,
                    target: EntryTarget::Content {
                        mime_type: "text/html".into(),
                        chunk: 0,
                        offset: 0,
                        length: 40,
                    },
                },
                EntryRecord {
                    url: "A/index".into(),
                    title: String::new(),
                    index: false,
                    compress: false,
                    target: EntryTarget::Redirect {
                        target: "A/home".into(),
                    },
                },
            ],
            titles: vec![],
        };
        trailer.index_titles();
        trailer
    }

    #[test]
    fn trailer_survives_encoding() {
        let trailer = sample();
        let mut buf = vec![];
        trailer.write(&mut buf).unwrap();

        let decoded = Trailer::deserialize_owned(&mut Cursor::new(&buf[..])).unwrap();
        assert_eq!(decoded, trailer);
        // "A/index" falls back to its url as title, sorting it first.
        assert_eq!(decoded.titles, vec![1, 0]);
    }

    #[test]
    fn truncated_trailer_is_rejected() {
        let mut buf = vec![];
        sample().write(&mut buf).unwrap();
        buf.truncate(buf.len() - 3);

        assert!(Trailer::deserialize_owned(&mut Cursor::new(&buf[..])).is_err());
    }

    #[test]
    fn header_magic_is_checked() {
        let mut buf = vec![];
        TomeHeader::new(1024).write(&mut buf).unwrap();
        assert_eq!(buf.len(), TomeHeader::SIZE);

        let header = TomeHeader::deserialize_owned(&mut Cursor::new(&buf[..])).unwrap();
        assert_eq!(header, TomeHeader::new(1024));

        buf[1] = b'X';
        assert!(TomeHeader::deserialize_owned(&mut Cursor::new(&buf[..])).is_err());
    }
}
