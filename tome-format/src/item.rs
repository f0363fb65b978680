//! Content providers: the caller's side of the writer contract.
//!
//! A [`TomeWriter`](crate::TomeWriter) never reads an [`Item`] when it is
//! added. Every method is called later, during `close()`, in insertion order,
//! through [`invoke`], which turns failures into a [`ProviderError`].

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{blob::Blob, error::ProviderError};

pub type ItemResult<T> = std::result::Result<T, ItemError>;

/// The capability methods of [`Item`], used to name the method that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemMethod {
    Url,
    Title,
    MimeType,
    Filename,
    ShouldCompress,
    ShouldIndex,
    IsRedirect,
    RedirectUrl,
    Data,
    Size,
}

impl ItemMethod {
    pub const ALL: [ItemMethod; 10] = [
        ItemMethod::Url,
        ItemMethod::Title,
        ItemMethod::MimeType,
        ItemMethod::Filename,
        ItemMethod::ShouldCompress,
        ItemMethod::ShouldIndex,
        ItemMethod::IsRedirect,
        ItemMethod::RedirectUrl,
        ItemMethod::Data,
        ItemMethod::Size,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ItemMethod::Url => "url",
            ItemMethod::Title => "title",
            ItemMethod::MimeType => "mime_type",
            ItemMethod::Filename => "filename",
            ItemMethod::ShouldCompress => "should_compress",
            ItemMethod::ShouldIndex => "should_index",
            ItemMethod::IsRedirect => "is_redirect",
            ItemMethod::RedirectUrl => "redirect_url",
            ItemMethod::Data => "data",
            ItemMethod::Size => "size",
        }
    }
}

impl fmt::Display for ItemMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an [`Item`] method returns on failure.
///
/// Any `std::error::Error` converts into `ItemError::Failed` with `?`, keeping
/// the error's type name and message. Like `anyhow::Error`, this type does not
/// implement `std::error::Error` itself so that the blanket conversion works.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    /// The method has no implementation for this item.
    NotImplemented,
    Failed { kind: String, message: String },
}

impl ItemError {
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> ItemError {
        ItemError::Failed {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl<E> From<E> for ItemError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        ItemError::Failed {
            kind: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemError::NotImplemented => f.write_str("not implemented"),
            ItemError::Failed { kind, message } => write!(f, "{}: {}", kind, message),
        }
    }
}

/// One unit of content (or a redirect) to be written into an archive.
///
/// Every method has a default body returning [`ItemError::NotImplemented`],
/// so an implementation only needs the methods the writer will call for it:
///
/// - always: `url`, `title`, `is_redirect`
/// - redirects: `redirect_url`
/// - content: `mime_type`, `should_compress`, `should_index`, `filename`, `size`
/// - content without a filename and with a nonzero `size`: `data`
pub trait Item {
    fn url(&self) -> ItemResult<String> {
        Err(ItemError::NotImplemented)
    }

    fn title(&self) -> ItemResult<String> {
        Err(ItemError::NotImplemented)
    }

    fn mime_type(&self) -> ItemResult<String> {
        Err(ItemError::NotImplemented)
    }

    /// A path to stream the content from instead of calling `data`.
    fn filename(&self) -> ItemResult<Option<PathBuf>> {
        Err(ItemError::NotImplemented)
    }

    fn should_compress(&self) -> ItemResult<bool> {
        Err(ItemError::NotImplemented)
    }

    fn should_index(&self) -> ItemResult<bool> {
        Err(ItemError::NotImplemented)
    }

    fn is_redirect(&self) -> ItemResult<bool> {
        Err(ItemError::NotImplemented)
    }

    fn redirect_url(&self) -> ItemResult<String> {
        Err(ItemError::NotImplemented)
    }

    fn data(&self) -> ItemResult<Blob> {
        Err(ItemError::NotImplemented)
    }

    /// Size of the content in bytes. Zero means `data` is never called.
    fn size(&self) -> ItemResult<u64> {
        Err(ItemError::NotImplemented)
    }
}

macro_rules! forward_item {
    ($($ty:ty),*) => {$(
        impl<T: Item + ?Sized> Item for $ty {
            fn url(&self) -> ItemResult<String> { (**self).url() }
            fn title(&self) -> ItemResult<String> { (**self).title() }
            fn mime_type(&self) -> ItemResult<String> { (**self).mime_type() }
            fn filename(&self) -> ItemResult<Option<PathBuf>> { (**self).filename() }
            fn should_compress(&self) -> ItemResult<bool> { (**self).should_compress() }
            fn should_index(&self) -> ItemResult<bool> { (**self).should_index() }
            fn is_redirect(&self) -> ItemResult<bool> { (**self).is_redirect() }
            fn redirect_url(&self) -> ItemResult<String> { (**self).redirect_url() }
            fn data(&self) -> ItemResult<Blob> { (**self).data() }
            fn size(&self) -> ItemResult<u64> { (**self).size() }
        }
    )*};
}

forward_item!(Box<T>, Arc<T>, &T);

/// Calls one provider method, translating its failure into a [`ProviderError`].
///
/// This is the only place caller-supplied code runs during finalization.
pub(crate) fn invoke<T, F>(position: usize, method: ItemMethod, f: F) -> Result<T, ProviderError>
where
    F: FnOnce() -> ItemResult<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(ItemError::NotImplemented)) => {
            Err(ProviderError::NotImplemented { method, position })
        }
        Ok(Err(ItemError::Failed { kind, message })) => Err(ProviderError::Failed {
            method,
            position,
            kind,
            message,
        }),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(ProviderError::Panicked {
                method,
                position,
                message,
            })
        }
    }
}

/// Content supplied directly from memory.
#[derive(Debug, Clone)]
pub struct ContentItem {
    pub url: String,
    pub title: String,
    pub mime_type: String,
    pub content: Blob,
    pub compress: bool,
    pub index: bool,
}

impl ContentItem {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        mime_type: impl Into<String>,
        content: impl Into<Blob>,
    ) -> ContentItem {
        ContentItem {
            url: url.into(),
            title: title.into(),
            mime_type: mime_type.into(),
            content: content.into(),
            compress: true,
            index: true,
        }
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_index(mut self, index: bool) -> Self {
        self.index = index;
        self
    }
}

impl Item for ContentItem {
    fn url(&self) -> ItemResult<String> {
        Ok(self.url.clone())
    }

    fn title(&self) -> ItemResult<String> {
        Ok(self.title.clone())
    }

    fn mime_type(&self) -> ItemResult<String> {
        Ok(self.mime_type.clone())
    }

    fn filename(&self) -> ItemResult<Option<PathBuf>> {
        Ok(None)
    }

    fn should_compress(&self) -> ItemResult<bool> {
        Ok(self.compress)
    }

    fn should_index(&self) -> ItemResult<bool> {
        Ok(self.index)
    }

    fn is_redirect(&self) -> ItemResult<bool> {
        Ok(false)
    }

    fn data(&self) -> ItemResult<Blob> {
        Ok(self.content.clone())
    }

    fn size(&self) -> ItemResult<u64> {
        Ok(self.content.size())
    }
}

/// Content streamed from a file on disk when the archive is finalized.
#[derive(Debug, Clone)]
pub struct FileItem {
    pub url: String,
    pub title: String,
    pub mime_type: String,
    pub path: PathBuf,
    pub compress: bool,
    pub index: bool,
}

impl FileItem {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        mime_type: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> FileItem {
        FileItem {
            url: url.into(),
            title: title.into(),
            mime_type: mime_type.into(),
            path: path.as_ref().to_path_buf(),
            compress: true,
            index: true,
        }
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }
}

impl Item for FileItem {
    fn url(&self) -> ItemResult<String> {
        Ok(self.url.clone())
    }

    fn title(&self) -> ItemResult<String> {
        Ok(self.title.clone())
    }

    fn mime_type(&self) -> ItemResult<String> {
        Ok(self.mime_type.clone())
    }

    fn filename(&self) -> ItemResult<Option<PathBuf>> {
        Ok(Some(self.path.clone()))
    }

    fn should_compress(&self) -> ItemResult<bool> {
        Ok(self.compress)
    }

    fn should_index(&self) -> ItemResult<bool> {
        Ok(self.index)
    }

    fn is_redirect(&self) -> ItemResult<bool> {
        Ok(false)
    }

    fn size(&self) -> ItemResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

/// An entry that points at another entry's identifier.
#[derive(Debug, Clone)]
pub struct RedirectItem {
    pub url: String,
    pub title: String,
    pub target: String,
}

impl RedirectItem {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        target: impl Into<String>,
    ) -> RedirectItem {
        RedirectItem {
            url: url.into(),
            title: title.into(),
            target: target.into(),
        }
    }
}

impl Item for RedirectItem {
    fn url(&self) -> ItemResult<String> {
        Ok(self.url.clone())
    }

    fn title(&self) -> ItemResult<String> {
        Ok(self.title.clone())
    }

    fn is_redirect(&self) -> ItemResult<bool> {
        Ok(true)
    }

    fn redirect_url(&self) -> ItemResult<String> {
        Ok(self.target.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    impl Item for Bare {}

    #[test]
    fn default_methods_are_not_implemented() {
        let err = invoke(3, ItemMethod::Url, || Bare.url()).unwrap_err();
        assert_eq!(
            err,
            ProviderError::NotImplemented {
                method: ItemMethod::Url,
                position: 3
            }
        );
        assert!(err.to_string().contains("NotImplementedError"));
        assert!(err.to_string().contains("`url` must be implemented"));
    }

    #[test]
    fn errors_keep_type_and_message() {
        struct Broken;

        impl Item for Broken {
            fn data(&self) -> ItemResult<Blob> {
                let bytes = std::fs::read("/this/path/does/not/exist")?;
                Ok(bytes.into())
            }
        }

        let err = invoke(0, ItemMethod::Data, || Broken.data()).unwrap_err();
        match &err {
            ProviderError::Failed { method, kind, .. } => {
                assert_eq!(*method, ItemMethod::Data);
                assert!(kind.contains("io::error::Error"), "{}", kind);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(err.to_string().starts_with("Error in `data`"));
    }

    #[test]
    fn panics_are_caught() {
        struct Panicky;

        impl Item for Panicky {
            fn is_redirect(&self) -> ItemResult<bool> {
                panic!("OUPS Redirect")
            }
        }

        let err = invoke(1, ItemMethod::IsRedirect, || Panicky.is_redirect()).unwrap_err();
        assert_eq!(
            err,
            ProviderError::Panicked {
                method: ItemMethod::IsRedirect,
                position: 1,
                message: "OUPS Redirect".into()
            }
        );
    }

    #[test]
    fn arc_forwards() {
        let item = Arc::new(ContentItem::new("A/home", "Home", "text/html", "hi"));
        let shared: Box<dyn Item> = Box::new(item.clone());
        assert_eq!(shared.url().unwrap(), "A/home");
        assert_eq!(shared.size().unwrap(), 2);
        assert!(RedirectItem::new("A/x", "", "A/home").data().is_err());
    }
}
