use std::path::PathBuf;

use crate::item::ItemMethod;

/// Invalid writer configuration, reported before anything touches the disk.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error(
        "Unknown compression '{0}'. Expected one of: {}",
        crate::Compression::available_variants().join(", ")
    )]
    UnknownCompression(String),

    #[error("Unknown compression id {0:#x}.")]
    UnknownCompressionId(u8),

    #[error("Compression '{0}' was not compiled into this build.")]
    UnsupportedCompression(&'static str),

    #[error("Minimum chunk size must be greater than zero.")]
    InvalidChunkSize,
}

/// Misuse of the writer lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Writer is already closed; close() may only be called once.")]
    AlreadyClosed,

    #[error("Writer is closed; cannot {operation}.")]
    Closed { operation: &'static str },
}

/// A caller-supplied [`Item`](crate::Item) failed during finalization.
///
/// `position` is the item's index in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("NotImplementedError: `{method}` must be implemented (item #{position}).")]
    NotImplemented { method: ItemMethod, position: usize },

    #[error("Error in `{method}` (item #{position}): {kind}: {message}")]
    Failed {
        method: ItemMethod,
        position: usize,
        kind: String,
        message: String,
    },

    #[error("Panic in `{method}` (item #{position}): {message}")]
    Panicked {
        method: ItemMethod,
        position: usize,
        message: String,
    },
}

impl ProviderError {
    pub fn method(&self) -> ItemMethod {
        match self {
            ProviderError::NotImplemented { method, .. }
            | ProviderError::Failed { method, .. }
            | ProviderError::Panicked { method, .. } => *method,
        }
    }

    pub fn position(&self) -> usize {
        match self {
            ProviderError::NotImplemented { position, .. }
            | ProviderError::Failed { position, .. }
            | ProviderError::Panicked { position, .. } => *position,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Duplicate identifier. Identifier: '{0}'")]
    DuplicateIdentifier(String),

    #[error("Empty identifier returned by `url` (item #{0}).")]
    EmptyIdentifier(usize),

    #[error("Missing required metadata. Key: '{0}'")]
    MissingMetadata(&'static str),

    #[error("Redirect target not found. Identifier: '{0}' -> '{1}'")]
    DanglingRedirect(String, String),

    #[error(
        "Declared size does not match content. Identifier: '{url}' (declared {declared}, actual {actual})"
    )]
    SizeMismatch {
        url: String,
        declared: u64,
        actual: u64,
    },

    #[error("Reading item content failed. Path: '{}'", .1.display())]
    ContentReadFailed(#[source] std::io::Error, PathBuf),

    #[error("Invalid path to Tome file. Path: '{}'", .1.display())]
    InvalidPath(#[source] std::io::Error, PathBuf),

    #[error("Writing Tome file failed. Path: '{}'", .1.display())]
    WriteFailed(#[source] std::io::Error, PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("Could not find trailer (the archive was never finalized).")]
    MissingTrailer,

    #[error("Invalid trailer data (the data that describes where all the entries are is invalid).")]
    InvalidTrailer(#[source] std::io::Error),

    #[error("Could not read header. Is this a valid Tome archive?")]
    MissingHeader(#[source] std::io::Error),

    #[error("Invalid path to Tome file. Path: '{}'", .1.display())]
    InvalidPath(#[source] std::io::Error, PathBuf),

    #[error("Failed to read Tome file. Path: '{}'", .1.display())]
    ReadFailed(#[source] std::io::Error, PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("Entry not found in archive. Identifier: '{0}'")]
    NotFound(String),

    #[error("Entry is not a redirect. Identifier: '{0}'")]
    NotARedirect(String),

    #[error("Entry points outside of its chunk. Identifier: '{0}'")]
    InvalidChunk(String),

    #[error("Decompressing chunk failed. Chunk: {1}")]
    DecompressionFailed(#[source] std::io::Error, u64),
}
