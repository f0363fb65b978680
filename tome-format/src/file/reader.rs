use std::cell::OnceCell;
use std::fmt;
use std::fs::File;
use std::io::Cursor;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use memmap2::Mmap;
use parking_lot::Mutex;

use crate::{
    blob::Blob,
    compression::{decompress_bytes, Compression},
    de::DeserializeOwned,
    error::{EntryError, OpenError},
    header::{TomeHeader, VERSION},
    metadata::{TomeMetadata, METADATA_NAMESPACE},
    record::{ChunkRecord, EntryRecord, EntryTarget, Trailer},
};

/// Length of the blake3 digest that ends every finalized file.
pub(crate) const CHECKSUM_SIZE: usize = blake3::OUT_LEN;

const CHUNK_CACHE_CAPACITY: usize = 8;

/// LRU cache for decompressed chunks, keyed by chunk id.
struct ChunkCache {
    cache: LruCache<u64, Arc<[u8]>>,
}

impl ChunkCache {
    fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    fn get(&mut self, id: u64) -> Option<Arc<[u8]>> {
        self.cache.get(&id).cloned()
    }

    fn insert(&mut self, id: u64, data: Arc<[u8]>) {
        self.cache.put(id, data);
    }
}

/// A finalized `.tome` archive, memory mapped for lookups.
pub struct TomeReader {
    path: PathBuf,
    mmap: Mmap,
    header: TomeHeader,
    trailer: Trailer,
    cache: Mutex<ChunkCache>,
}

impl fmt::Debug for TomeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TomeReader")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("main_page", &self.trailer.main_page)
            .field("chunks", &self.trailer.chunks.len())
            .field("entries", &self.trailer.entries.len())
            .finish()
    }
}

fn too_short() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "file is too short to hold a header and checksum",
    )
}

impl TomeReader {
    /// Opens a finalized archive. Unfinished or foreign files are rejected.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<TomeReader, OpenError> {
        let path = path
            .as_ref()
            .canonicalize()
            .map_err(|e| OpenError::InvalidPath(e, path.as_ref().to_path_buf()))?;

        let file = File::open(&path).map_err(|e| OpenError::ReadFailed(e, path.clone()))?;
        let len = file
            .metadata()
            .map_err(|e| OpenError::ReadFailed(e, path.clone()))?
            .len();
        if len < (TomeHeader::SIZE + CHECKSUM_SIZE) as u64 {
            return Err(OpenError::MissingHeader(too_short()));
        }

        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| OpenError::ReadFailed(e, path.clone()))?;

        let header = TomeHeader::deserialize_owned(&mut Cursor::new(&mmap[..TomeHeader::SIZE]))
            .map_err(OpenError::MissingHeader)?;
        if header.version != VERSION {
            return Err(OpenError::MissingHeader(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported version {}", header.version),
            )));
        }

        let start = header.trailer.ok_or(OpenError::MissingTrailer)?.get();
        let end = mmap.len() - CHECKSUM_SIZE;
        let bytes = usize::try_from(start)
            .ok()
            .filter(|start| *start >= TomeHeader::SIZE)
            .and_then(|start| mmap.get(start..end))
            .ok_or_else(|| {
                OpenError::InvalidTrailer(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("trailer offset {:#x} is out of bounds", start),
                ))
            })?;
        let trailer =
            Trailer::deserialize_owned(&mut Cursor::new(bytes)).map_err(OpenError::InvalidTrailer)?;

        tracing::debug!(
            path = %path.display(),
            chunks = trailer.chunks.len(),
            entries = trailer.entries.len(),
            "opened archive"
        );

        Ok(TomeReader {
            path,
            mmap,
            header,
            trailer,
            cache: Mutex::new(ChunkCache::new(CHUNK_CACHE_CAPACITY)),
        })
    }

    #[inline(always)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The main page identifier, exactly as it was given to the writer.
    #[inline(always)]
    pub fn main_page_url(&self) -> &str {
        &self.trailer.main_page
    }

    #[inline(always)]
    pub fn language(&self) -> &str {
        &self.trailer.language
    }

    #[inline(always)]
    pub fn min_chunk_size(&self) -> u32 {
        self.header.min_chunk_size
    }

    /// Number of entries, metadata included.
    #[inline(always)]
    pub fn entry_count(&self) -> usize {
        self.trailer.entries.len()
    }

    /// Chunk layout, in chunk id order.
    #[inline(always)]
    pub fn chunks(&self) -> &[ChunkRecord] {
        &self.trailer.chunks
    }

    pub fn has_entry(&self, url: &str) -> bool {
        self.trailer.position(strip_root(url)).is_some()
    }

    /// Looks up an entry by identifier. A single leading `/` is ignored.
    pub fn entry(&self, url: &str) -> Result<Entry<'_>, EntryError> {
        self.trailer
            .position(strip_root(url))
            .map(|i| Entry::new(self, &self.trailer.entries[i]))
            .ok_or_else(|| EntryError::NotFound(url.to_string()))
    }

    pub fn main_entry(&self) -> Result<Entry<'_>, EntryError> {
        self.entry(self.main_page_url())
    }

    /// All entries in identifier order.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            reader: self,
            inner: self.trailer.entries.iter(),
        }
    }

    fn titled(&self) -> impl Iterator<Item = &EntryRecord> + '_ {
        self.trailer
            .titles
            .iter()
            .map(move |i| &self.trailer.entries[*i as usize])
    }

    fn title_start(&self, title: &str) -> usize {
        let entries = &self.trailer.entries;
        self.trailer
            .titles
            .partition_point(|i| entries[*i as usize].display_title() < title)
    }

    /// The first entry (by identifier) whose title is exactly `title`.
    ///
    /// Entries without a title are found by their identifier. Metadata is not
    /// searchable by title.
    pub fn entry_by_title(&self, title: &str) -> Result<Entry<'_>, EntryError> {
        self.titled()
            .nth(self.title_start(title))
            .filter(|record| record.display_title() == title)
            .map(|record| Entry::new(self, record))
            .ok_or_else(|| EntryError::NotFound(title.to_string()))
    }

    /// Entries whose title starts with `prefix`, in title order.
    pub fn entries_with_title_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = Entry<'a>> + 'a {
        self.titled()
            .skip(self.title_start(prefix))
            .take_while(move |record| record.display_title().starts_with(prefix))
            .map(move |record| Entry::new(self, record))
    }

    /// Reads the metadata value stored under `key`.
    pub fn metadata(&self, key: &str) -> Result<String, EntryError> {
        let entry = self
            .entry(&TomeMetadata::entry_url(key))
            .map_err(|_| EntryError::NotFound(key.to_string()))?;
        let content = entry.content()?;
        Ok(String::from_utf8_lossy(content).into_owned())
    }

    pub fn metadata_keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.trailer
            .entries
            .iter()
            .filter_map(|e| e.url.strip_prefix(METADATA_NAMESPACE))
    }

    /// The blake3 digest stored at the end of the file.
    pub fn checksum(&self) -> [u8; CHECKSUM_SIZE] {
        let mut digest = [0u8; CHECKSUM_SIZE];
        digest.copy_from_slice(&self.mmap[self.mmap.len() - CHECKSUM_SIZE..]);
        digest
    }

    /// Rehashes the file and compares it against [`checksum`](Self::checksum).
    pub fn verify(&self) -> bool {
        let body = &self.mmap[..self.mmap.len() - CHECKSUM_SIZE];
        blake3::hash(body).as_bytes() == &self.checksum()
    }

    /// Raw chunk bytes, as written. `None` if the record points outside the
    /// chunk area.
    fn raw_chunk(&self, record: &ChunkRecord) -> Option<&[u8]> {
        let end = self.header.trailer.map(|t| t.get())?;
        let start = record.offset;
        let stop = start.checked_add(record.length).filter(|stop| *stop <= end)?;
        if start < TomeHeader::SIZE as u64 {
            return None;
        }
        self.mmap.get(start as usize..stop as usize)
    }

    fn decompressed_chunk(&self, id: u64, record: &ChunkRecord) -> Result<Arc<[u8]>, EntryError> {
        if let Some(data) = self.cache.lock().get(id) {
            return Ok(data);
        }

        let raw = self.raw_chunk(record).ok_or_else(|| {
            EntryError::DecompressionFailed(
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "chunk extends past the chunk area",
                ),
                id,
            )
        })?;
        let data: Arc<[u8]> = decompress_bytes(
            raw,
            record.compression,
            record.decompressed_length as usize,
        )
        .map_err(|e| EntryError::DecompressionFailed(e, id))?
        .into();

        if data.len() as u64 != record.decompressed_length {
            return Err(EntryError::DecompressionFailed(
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "chunk decompressed to {} bytes, expected {}",
                        data.len(),
                        record.decompressed_length
                    ),
                ),
                id,
            ));
        }

        tracing::trace!(
            chunk = id,
            offset = format_args!("{:#x}", record.offset),
            bytes = data.len(),
            "decompressed chunk"
        );

        self.cache.lock().insert(id, data.clone());
        Ok(data)
    }

    fn read_content(&self, record: &EntryRecord) -> Result<Blob, EntryError> {
        let (chunk, offset, length) = match &record.target {
            EntryTarget::Content {
                chunk,
                offset,
                length,
                ..
            } => (*chunk, *offset, *length),
            EntryTarget::Redirect { .. } => return Ok(Blob::empty()),
        };
        if length == 0 {
            return Ok(Blob::empty());
        }

        let invalid = || EntryError::InvalidChunk(record.url.clone());
        let chunk_record = usize::try_from(chunk)
            .ok()
            .and_then(|i| self.trailer.chunks.get(i))
            .ok_or_else(invalid)?;
        let range = offset
            .checked_add(length)
            .map(|end| offset as usize..end as usize)
            .ok_or_else(invalid)?;

        match chunk_record.compression {
            Compression::Stored => self
                .raw_chunk(chunk_record)
                .and_then(|raw| raw.get(range))
                .map(Blob::from)
                .ok_or_else(invalid),
            _ => self
                .decompressed_chunk(chunk, chunk_record)?
                .get(range)
                .map(Blob::from)
                .ok_or_else(invalid),
        }
    }
}

#[inline(always)]
fn strip_root(url: &str) -> &str {
    url.strip_prefix('/').unwrap_or(url)
}

/// One entry of an open archive. Content is read on first access and kept.
pub struct Entry<'a> {
    reader: &'a TomeReader,
    record: &'a EntryRecord,
    content: OnceCell<Blob>,
}

impl fmt::Debug for Entry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("url", &self.record.url)
            .field("title", &self.record.title)
            .field("target", &self.record.target)
            .finish()
    }
}

impl<'a> Entry<'a> {
    fn new(reader: &'a TomeReader, record: &'a EntryRecord) -> Entry<'a> {
        Entry {
            reader,
            record,
            content: OnceCell::new(),
        }
    }

    #[inline(always)]
    pub fn url(&self) -> &'a str {
        &self.record.url
    }

    /// The title, or the identifier when the entry has none.
    #[inline(always)]
    pub fn title(&self) -> &'a str {
        self.record.display_title()
    }

    /// Empty for redirects.
    #[inline(always)]
    pub fn mime_type(&self) -> &'a str {
        self.record.mime_type()
    }

    #[inline(always)]
    pub fn is_redirect(&self) -> bool {
        self.record.is_redirect()
    }

    #[inline(always)]
    pub fn redirect_url(&self) -> Option<&'a str> {
        self.record.redirect_target()
    }

    #[inline(always)]
    pub fn should_index(&self) -> bool {
        self.record.index
    }

    #[inline(always)]
    pub fn record(&self) -> &'a EntryRecord {
        self.record
    }

    /// Content length in bytes, known without reading the content.
    pub fn size(&self) -> u64 {
        match &self.record.target {
            EntryTarget::Content { length, .. } => *length,
            EntryTarget::Redirect { .. } => 0,
        }
    }

    /// The entry's bytes. Redirects have empty content.
    pub fn content(&self) -> Result<&Blob, EntryError> {
        if let Some(blob) = self.content.get() {
            return Ok(blob);
        }
        let blob = self.reader.read_content(self.record)?;
        Ok(self.content.get_or_init(|| blob))
    }

    /// The entry this redirect points at. Only one hop is followed.
    pub fn redirect_entry(&self) -> Result<Entry<'a>, EntryError> {
        match self.record.redirect_target() {
            Some(target) => self.reader.entry(target),
            None => Err(EntryError::NotARedirect(self.record.url.clone())),
        }
    }
}

/// Iterator over every entry of a [`TomeReader`], in identifier order.
pub struct Entries<'a> {
    reader: &'a TomeReader,
    inner: std::slice::Iter<'a, EntryRecord>,
}

impl<'a> Iterator for Entries<'a> {
    type Item = Entry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|record| Entry::new(self.reader, record))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Entries<'_> {}
