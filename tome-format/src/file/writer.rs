use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{prelude::*, BufWriter, SeekFrom};
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::{
    blob::Blob,
    compression::{compress_bytes, Compression, CompressionSpec, DEFAULT_CHUNK_SIZE},
    error::{ConfigurationError, LifecycleError, WriteError},
    header::TomeHeader,
    item::{invoke, Item, ItemMethod},
    metadata::TomeMetadata,
    record::{ChunkRecord, EntryRecord, EntryTarget, Trailer},
    ser::Serialize,
};

use super::chunk::{ChunkBuilder, Placement, SealedChunk};

const DEFAULT_LANGUAGE: &str = "eng";
const METADATA_MIME_TYPE: &str = "text/plain;charset=utf-8";

/// Optional parameters for [`TomeWriter::create_with_options`].
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Language tag of the archive's content, seeded into the `Language` metadata.
    pub language: String,
    /// Uncompressed bytes a chunk collects before it is compressed and written.
    pub min_chunk_size: u32,
    pub compression: CompressionSpec,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            language: DEFAULT_LANGUAGE.to_string(),
            min_chunk_size: DEFAULT_CHUNK_SIZE,
            compression: CompressionSpec::default(),
        }
    }
}

impl WriterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_min_chunk_size(mut self, min_chunk_size: u32) -> Self {
        self.min_chunk_size = min_chunk_size;
        self
    }

    pub fn with_compression(mut self, compression: impl Into<CompressionSpec>) -> Self {
        self.compression = compression.into();
        self
    }

    /// Creates a writer, hands it to `f`, and closes it if `f` succeeds.
    ///
    /// If `f` returns an error the writer is dropped unfinished and nothing is
    /// written to `path`.
    pub fn build_with<P, S, F, T, E>(self, path: P, main_page: S, f: F) -> Result<T, E>
    where
        P: AsRef<Path>,
        S: Into<String>,
        F: FnOnce(&mut TomeWriter) -> Result<T, E>,
        E: From<WriteError>,
    {
        let mut writer = TomeWriter::create_with_options(path, main_page, self)?;
        let value = f(&mut writer)?;
        writer.close()?;
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
}

/// Collects items and metadata, and writes them out as a `.tome` file on
/// [`close`](TomeWriter::close).
///
/// Nothing touches the disk before `close`. The archive is assembled in a
/// temporary file next to the target and renamed into place only once it is
/// complete, so a failed or abandoned writer never leaves a file behind.
pub struct TomeWriter {
    path: PathBuf,
    main_page: String,
    language: String,
    min_chunk_size: u32,
    compression: Compression,
    metadata: TomeMetadata,
    queue: Vec<Box<dyn Item>>,
    state: State,
}

impl std::fmt::Debug for TomeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TomeWriter")
            .field("path", &self.path)
            .field("main_page", &self.main_page)
            .field("compression", &self.compression)
            .field("min_chunk_size", &self.min_chunk_size)
            .field("metadata", &self.metadata)
            .field("queued", &self.queue.len())
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for TomeWriter {
    fn drop(&mut self) {
        if self.state == State::Open {
            tracing::debug!(
                path = %self.path.display(),
                queued = self.queue.len(),
                "TomeWriter dropped without close(); nothing written"
            );
        }
    }
}

impl TomeWriter {
    pub fn create<P: AsRef<Path>, S: Into<String>>(
        path: P,
        main_page: S,
    ) -> Result<TomeWriter, WriteError> {
        Self::create_with_options(path, main_page, WriterOptions::default())
    }

    pub fn create_with_options<P: AsRef<Path>, S: Into<String>>(
        path: P,
        main_page: S,
        options: WriterOptions,
    ) -> Result<TomeWriter, WriteError> {
        let compression = options.compression.resolve()?;
        if options.min_chunk_size == 0 {
            return Err(ConfigurationError::InvalidChunkSize.into());
        }
        let path = absolute_path(path.as_ref())?;

        let mut metadata = TomeMetadata::new();
        metadata.insert("Language", options.language.clone());
        metadata.insert("Date", chrono::Utc::now().format("%Y-%m-%d").to_string());

        tracing::debug!(
            path = %path.display(),
            %compression,
            min_chunk_size = options.min_chunk_size,
            "created TomeWriter"
        );

        Ok(TomeWriter {
            path,
            main_page: main_page.into(),
            language: options.language,
            min_chunk_size: options.min_chunk_size,
            compression,
            metadata,
            queue: Vec::new(),
            state: State::Open,
        })
    }

    /// Absolute path the archive will be written to.
    #[inline(always)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline(always)]
    pub fn main_page(&self) -> &str {
        &self.main_page
    }

    #[inline(always)]
    pub fn language(&self) -> &str {
        &self.language
    }

    #[inline(always)]
    pub fn min_chunk_size(&self) -> u32 {
        self.min_chunk_size
    }

    #[inline(always)]
    pub fn compression(&self) -> Compression {
        self.compression
    }

    #[inline(always)]
    pub fn metadata(&self) -> &TomeMetadata {
        &self.metadata
    }

    /// Number of items waiting for `close`.
    #[inline(always)]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    #[inline(always)]
    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), LifecycleError> {
        match self.state {
            State::Open => Ok(()),
            State::Closed => Err(LifecycleError::Closed { operation }),
        }
    }

    /// Queues an item. None of its methods are called until `close`.
    pub fn add_item<I: Item + 'static>(&mut self, item: I) -> Result<(), LifecycleError> {
        self.ensure_open("add an item")?;
        self.queue.push(Box::new(item));
        tracing::trace!(position = self.queue.len() - 1, "queued item");
        Ok(())
    }

    pub fn set_metadata(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), LifecycleError> {
        self.ensure_open("update metadata")?;
        self.metadata.insert(key, value);
        Ok(())
    }

    /// Merges `pairs` into the metadata; later values replace earlier ones.
    pub fn update_metadata<I, K, V>(&mut self, pairs: I) -> Result<(), LifecycleError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.ensure_open("update metadata")?;
        self.metadata.extend(pairs);
        Ok(())
    }

    /// Resolves every queued item and commits the archive to [`path`](Self::path).
    ///
    /// The writer is closed afterwards whether or not this succeeds. On
    /// failure no file is created at the target path.
    pub fn close(&mut self) -> Result<(), WriteError> {
        if self.state == State::Closed {
            return Err(LifecycleError::AlreadyClosed.into());
        }
        self.state = State::Closed;
        let queue = std::mem::take(&mut self.queue);

        if let Some(key) = self.metadata.missing_required() {
            return Err(WriteError::MissingMetadata(key));
        }

        let temp = self.temp_file()?;
        let mut assembly = Assembly::new(
            BufWriter::new(temp),
            &self.path,
            self.min_chunk_size,
            self.compression,
        );
        assembly.start()?;

        for (position, item) in queue.iter().enumerate() {
            assembly.add(position, &**item)?;
        }
        drop(queue);

        for (key, value) in self.metadata.iter() {
            assembly.add_metadata(key, value)?;
        }

        let entries = assembly.entries.len();
        let mut temp = assembly.finish(&self.main_page, &self.language)?;
        append_checksum(temp.as_file_mut()).map_err(|e| self.write_failed(e))?;
        temp.persist(&self.path)
            .map_err(|e| self.write_failed(e.error))?;

        tracing::info!(path = %self.path.display(), entries, "finalized archive");
        Ok(())
    }

    fn temp_file(&self) -> Result<NamedTempFile, WriteError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        tempfile::Builder::new()
            .prefix(&format!(".{}.", name))
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| self.write_failed(e))
    }

    #[inline(always)]
    fn write_failed(&self, error: std::io::Error) -> WriteError {
        WriteError::WriteFailed(error, self.path.clone())
    }
}

/// Joins a canonicalized parent directory with the file name, so the path
/// stays valid even though the file itself does not exist yet.
fn absolute_path(path: &Path) -> Result<PathBuf, WriteError> {
    let file_name = path.file_name().ok_or_else(|| {
        WriteError::InvalidPath(
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
            path.to_path_buf(),
        )
    })?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let parent = parent
        .canonicalize()
        .map_err(|e| WriteError::InvalidPath(e, path.to_path_buf()))?;

    Ok(parent.join(file_name))
}

fn append_checksum(file: &mut File) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    let mut hasher = blake3::Hasher::new();
    std::io::copy(file, &mut hasher)?;
    let digest = hasher.finalize();

    file.seek(SeekFrom::End(0))?;
    file.write_all(digest.as_bytes())?;
    file.sync_all()
}

const EMPTY: Placement = Placement {
    chunk: 0,
    offset: 0,
    length: 0,
};

/// The in-progress file during `close`.
struct Assembly<'a> {
    out: BufWriter<NamedTempFile>,
    path: &'a Path,
    header: TomeHeader,
    /// Next write position in `out`.
    offset: u64,
    next_chunk: u64,
    compressed: ChunkBuilder,
    stored: ChunkBuilder,
    chunks: BTreeMap<u64, ChunkRecord>,
    entries: Vec<EntryRecord>,
    seen: HashSet<String>,
}

impl<'a> Assembly<'a> {
    fn new(
        out: BufWriter<NamedTempFile>,
        path: &'a Path,
        min_chunk_size: u32,
        compression: Compression,
    ) -> Assembly<'a> {
        Assembly {
            out,
            path,
            header: TomeHeader::new(min_chunk_size),
            offset: 0,
            next_chunk: 0,
            compressed: ChunkBuilder::new(compression),
            stored: ChunkBuilder::new(Compression::Stored),
            chunks: BTreeMap::new(),
            entries: Vec::new(),
            seen: HashSet::new(),
        }
    }

    #[inline(always)]
    fn write_failed(&self, error: std::io::Error) -> WriteError {
        WriteError::WriteFailed(error, self.path.to_path_buf())
    }

    /// Writes a placeholder header; the real one goes in once the trailer
    /// offset is known.
    fn start(&mut self) -> Result<(), WriteError> {
        self.header
            .write(&mut self.out)
            .map_err(|e| self.write_failed(e))?;
        self.offset = TomeHeader::SIZE as u64;
        Ok(())
    }

    fn claim(&mut self, url: &str) -> Result<(), WriteError> {
        if !self.seen.insert(url.to_string()) {
            return Err(WriteError::DuplicateIdentifier(url.to_string()));
        }
        Ok(())
    }

    fn add(&mut self, position: usize, item: &dyn Item) -> Result<(), WriteError> {
        let url = invoke(position, ItemMethod::Url, || item.url())?;
        if url.is_empty() {
            return Err(WriteError::EmptyIdentifier(position));
        }
        self.claim(&url)?;
        let title = invoke(position, ItemMethod::Title, || item.title())?;

        if invoke(position, ItemMethod::IsRedirect, || item.is_redirect())? {
            let target = invoke(position, ItemMethod::RedirectUrl, || item.redirect_url())?;
            tracing::trace!(position, %url, %target, "resolved redirect");
            self.entries.push(EntryRecord {
                url,
                title,
                index: false,
                compress: false,
                target: EntryTarget::Redirect { target },
            });
            return Ok(());
        }

        let mime_type = invoke(position, ItemMethod::MimeType, || item.mime_type())?;
        let compress = invoke(position, ItemMethod::ShouldCompress, || item.should_compress())?;
        let index = invoke(position, ItemMethod::ShouldIndex, || item.should_index())?;
        let filename = invoke(position, ItemMethod::Filename, || item.filename())?;
        let declared = invoke(position, ItemMethod::Size, || item.size())?;

        let placement = match filename {
            Some(path) if !path.as_os_str().is_empty() => {
                self.append_file(&url, &path, declared, compress)?
            }
            _ if declared == 0 => EMPTY,
            _ => {
                let blob = invoke(position, ItemMethod::Data, || item.data())?;
                if blob.size() != declared {
                    return Err(WriteError::SizeMismatch {
                        url,
                        declared,
                        actual: blob.size(),
                    });
                }
                self.append_blob(&blob, compress)?
            }
        };

        tracing::trace!(
            position,
            %url,
            chunk = placement.chunk,
            bytes = placement.length,
            "resolved item"
        );

        self.entries.push(EntryRecord {
            url,
            title,
            index,
            compress,
            target: EntryTarget::Content {
                mime_type,
                chunk: placement.chunk,
                offset: placement.offset,
                length: placement.length,
            },
        });
        Ok(())
    }

    fn add_metadata(&mut self, key: &str, value: &str) -> Result<(), WriteError> {
        let url = TomeMetadata::entry_url(key);
        self.claim(&url)?;

        let placement = if value.is_empty() {
            EMPTY
        } else {
            self.append_blob(&Blob::from(value), false)?
        };

        self.entries.push(EntryRecord {
            url,
            title: key.to_string(),
            index: false,
            compress: false,
            target: EntryTarget::Content {
                mime_type: METADATA_MIME_TYPE.to_string(),
                chunk: placement.chunk,
                offset: placement.offset,
                length: placement.length,
            },
        });
        Ok(())
    }

    fn append_blob(&mut self, blob: &Blob, compress: bool) -> Result<Placement, WriteError> {
        let next_chunk = &mut self.next_chunk;
        let builder = match compress {
            true => &mut self.compressed,
            false => &mut self.stored,
        };
        let placement = builder.append(blob, next_chunk);
        self.seal_if_full(compress)?;
        Ok(placement)
    }

    fn append_file(
        &mut self,
        url: &str,
        path: &Path,
        declared: u64,
        compress: bool,
    ) -> Result<Placement, WriteError> {
        if declared == 0 {
            return Ok(EMPTY);
        }

        let file = File::open(path)
            .map_err(|e| WriteError::ContentReadFailed(e, path.to_path_buf()))?;
        let next_chunk = &mut self.next_chunk;
        let builder = match compress {
            true => &mut self.compressed,
            false => &mut self.stored,
        };
        let placement = builder
            .append_from(file, declared, next_chunk)
            .map_err(|e| WriteError::ContentReadFailed(e, path.to_path_buf()))?;

        if placement.length != declared {
            return Err(WriteError::SizeMismatch {
                url: url.to_string(),
                declared,
                actual: placement.length,
            });
        }

        self.seal_if_full(compress)?;
        Ok(placement)
    }

    fn seal_if_full(&mut self, compress: bool) -> Result<(), WriteError> {
        let builder = match compress {
            true => &mut self.compressed,
            false => &mut self.stored,
        };
        if !builder.is_full(self.header.min_chunk_size) {
            return Ok(());
        }
        match builder.seal() {
            Some(sealed) => self.commit(sealed),
            None => Ok(()),
        }
    }

    fn commit(&mut self, sealed: SealedChunk) -> Result<(), WriteError> {
        let data = compress_bytes(&sealed.data, sealed.compression)
            .map_err(|e| self.write_failed(e))?;
        self.out.write_all(&data).map_err(|e| self.write_failed(e))?;

        tracing::debug!(
            chunk = sealed.id,
            offset = format_args!("{:#x}", self.offset),
            bytes = data.len(),
            decompressed = sealed.data.len(),
            compression = %sealed.compression,
            "wrote chunk"
        );

        self.chunks.insert(
            sealed.id,
            ChunkRecord {
                compression: sealed.compression,
                offset: self.offset,
                length: data.len() as u64,
                decompressed_length: sealed.data.len() as u64,
            },
        );
        self.offset += data.len() as u64;
        Ok(())
    }

    /// Flushes open chunks, writes the trailer and the real header, and hands
    /// back the temporary file.
    fn finish(mut self, main_page: &str, language: &str) -> Result<NamedTempFile, WriteError> {
        for sealed in [self.compressed.seal(), self.stored.seal()]
            .into_iter()
            .flatten()
        {
            self.commit(sealed)?;
        }

        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_by(|a, b| a.url.cmp(&b.url));

        let mut trailer = Trailer {
            main_page: main_page.to_string(),
            language: language.to_string(),
            chunks: std::mem::take(&mut self.chunks).into_values().collect(),
            entries,
            titles: Vec::new(),
        };

        for entry in trailer.entries.iter() {
            if let Some(target) = entry.redirect_target() {
                if target == entry.url || trailer.position(target).is_none() {
                    return Err(WriteError::DanglingRedirect(
                        entry.url.clone(),
                        target.to_string(),
                    ));
                }
            }
        }
        trailer.index_titles();

        let trailer_offset = self.offset;
        trailer
            .write(&mut self.out)
            .map_err(|e| self.write_failed(e))?;
        self.header.trailer = NonZeroU64::new(trailer_offset);

        tracing::debug!(
            offset = format_args!("{:#x}", trailer_offset),
            chunks = trailer.chunks.len(),
            count = trailer.entries.len(),
            "wrote trailer"
        );

        let header = self.header.clone();
        let path = self.path.to_path_buf();
        let write_failed = |e| WriteError::WriteFailed(e, path.clone());

        self.out.seek(SeekFrom::Start(0)).map_err(write_failed)?;
        header.write(&mut self.out).map_err(write_failed)?;
        self.out.flush().map_err(write_failed)?;
        self.out
            .into_inner()
            .map_err(|e| WriteError::WriteFailed(e.into_error(), path.clone()))
    }
}
