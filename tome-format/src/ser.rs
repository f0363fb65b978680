use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use fastvlq::WriteVu64Ext;

use crate::{
    compression::Compression,
    header::TomeHeader,
    record::{
        ChunkRecord, EntryRecord, EntryTarget, Trailer, ENTRY_KIND_CONTENT, ENTRY_KIND_REDIRECT,
    },
};

pub(crate) trait Serialize {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()>;
}

impl<T: Serialize> Serialize for Vec<T> {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_vu64(self.len() as u64)?;

        for item in self.iter() {
            item.write(writer)?;
        }
        Ok(())
    }
}

impl Serialize for String {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_vu64(self.len() as u64)?;
        writer.write_all(self.as_bytes())
    }
}

impl Serialize for u64 {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_vu64(*self)
    }
}

impl Serialize for Compression {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u8(self.id())
    }
}

impl Serialize for ChunkRecord {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        self.compression.write(writer)?;
        writer.write_u64::<LittleEndian>(self.offset)?;
        writer.write_u64::<LittleEndian>(self.length)?;
        writer.write_u64::<LittleEndian>(self.decompressed_length)
    }
}

impl Serialize for EntryRecord {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let kind = match self.target {
            EntryTarget::Content { .. } => ENTRY_KIND_CONTENT,
            EntryTarget::Redirect { .. } => ENTRY_KIND_REDIRECT,
        };
        writer.write_u8(kind)?;
        writer.write_u8(self.flags())?;
        self.url.write(writer)?;
        self.title.write(writer)?;

        match &self.target {
            EntryTarget::Content {
                mime_type,
                chunk,
                offset,
                length,
            } => {
                mime_type.write(writer)?;
                writer.write_vu64(*chunk)?;
                writer.write_vu64(*offset)?;
                writer.write_vu64(*length)
            }
            EntryTarget::Redirect { target } => target.write(writer),
        }
    }
}

impl Serialize for TomeHeader {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.magic_bytes)?;
        writer.write_u8(self.version)?;
        writer.write_all(&[0u8; 3])?; // reserved1
        writer.write_u32::<LittleEndian>(self.min_chunk_size)?;
        writer.write_all(&[0u8; 4])?; // reserved2
        writer.write_u64::<LittleEndian>(self.trailer.map(|x| x.get()).unwrap_or(0))
    }
}

impl Serialize for Trailer {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        self.main_page.write(writer)?;
        self.language.write(writer)?;
        self.chunks.write(writer)?;
        self.entries.write(writer)?;
        self.titles.write(writer)
    }
}
