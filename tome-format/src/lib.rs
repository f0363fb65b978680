//! Herein lies the brains of the `tome` file format.
//!
//! Use [TomeWriter][TomeWriter] to assemble an archive from [Item]s, and
//! [TomeReader][TomeReader] to look entries up again.

mod blob;
mod compression;
mod de;
mod error;
mod file;
mod header;
pub mod item;
mod metadata;
mod record;
mod ser;

pub use blob::Blob;
pub use compression::{
    compress_bytes, decompress_bytes, Compression, CompressionSpec, DEFAULT_CHUNK_SIZE,
};
pub use error::{
    ConfigurationError, EntryError, LifecycleError, OpenError, ProviderError, WriteError,
};
pub use file::{Entry, Entries, TomeReader, TomeWriter, WriterOptions};
pub use item::{ContentItem, FileItem, Item, ItemError, ItemMethod, RedirectItem};
pub use metadata::{TomeMetadata, METADATA_NAMESPACE, OPTIONAL_KEYS, REQUIRED_KEYS};
pub use record::{ChunkRecord, EntryRecord, EntryTarget};
