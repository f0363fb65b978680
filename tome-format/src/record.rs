use crate::compression::Compression;
use crate::metadata::METADATA_NAMESPACE;

pub(crate) const ENTRY_KIND_CONTENT: u8 = 0x00;
pub(crate) const ENTRY_KIND_REDIRECT: u8 = 0x01;

pub(crate) const ENTRY_FLAG_INDEX: u8 = 0b01;
pub(crate) const ENTRY_FLAG_COMPRESS: u8 = 0b10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRecord {
    pub compression: Compression,

    /// The position of the chunk data in the file.
    pub offset: u64,

    /// The exact length of the chunk as written.
    pub length: u64,

    /// Length of the chunk once decompressed.
    pub decompressed_length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryTarget {
    Content {
        mime_type: String,
        chunk: u64,
        /// Offset of the content inside the decompressed chunk.
        offset: u64,
        length: u64,
    },
    Redirect {
        target: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    pub url: String,
    pub title: String,
    pub index: bool,
    pub compress: bool,
    pub target: EntryTarget,
}

impl EntryRecord {
    #[inline(always)]
    pub fn is_redirect(&self) -> bool {
        matches!(self.target, EntryTarget::Redirect { .. })
    }

    #[inline(always)]
    pub fn redirect_target(&self) -> Option<&str> {
        match &self.target {
            EntryTarget::Redirect { target } => Some(target),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn mime_type(&self) -> &str {
        match &self.target {
            EntryTarget::Content { mime_type, .. } => mime_type,
            EntryTarget::Redirect { .. } => "",
        }
    }

    /// The title, falling back to the identifier when none was given.
    #[inline(always)]
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }

    pub(crate) fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.index {
            flags |= ENTRY_FLAG_INDEX;
        }
        if self.compress {
            flags |= ENTRY_FLAG_COMPRESS;
        }
        flags
    }
}

/// Everything after the chunks: where each chunk lives and what each entry is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Trailer {
    pub(crate) main_page: String,
    pub(crate) language: String,
    pub(crate) chunks: Vec<ChunkRecord>,
    /// Sorted by `url`.
    pub(crate) entries: Vec<EntryRecord>,
    /// Positions into `entries`, sorted by `(display_title, url)`.
    pub(crate) titles: Vec<u64>,
}

impl Trailer {
    pub(crate) fn position(&self, url: &str) -> Option<usize> {
        self.entries
            .binary_search_by(|e| e.url.as_str().cmp(url))
            .ok()
    }

    /// Rebuilds the title index from `entries`, leaving metadata out.
    pub(crate) fn index_titles(&mut self) {
        let mut titles: Vec<u64> = (0..self.entries.len() as u64)
            .filter(|i| !self.entries[*i as usize].url.starts_with(METADATA_NAMESPACE))
            .collect();
        titles.sort_by(|a, b| {
            let a = &self.entries[*a as usize];
            let b = &self.entries[*b as usize];
            (a.display_title(), a.url.as_str()).cmp(&(b.display_title(), b.url.as_str()))
        });
        self.titles = titles;
    }
}
