use std::fmt;
use std::ops::Deref;

/// An immutable buffer of bytes with a known size.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Blob(Box<[u8]>);

impl Blob {
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Blob {
        Blob(bytes.into())
    }

    pub fn empty() -> Blob {
        Blob::default()
    }

    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.0.len() as u64
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0.into_vec()
    }
}

impl Deref for Blob {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Blob {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Blob {
    fn from(value: Vec<u8>) -> Self {
        Blob(value.into_boxed_slice())
    }
}

impl From<&[u8]> for Blob {
    fn from(value: &[u8]) -> Self {
        Blob(value.into())
    }
}

impl From<String> for Blob {
    fn from(value: String) -> Self {
        Blob::from(value.into_bytes())
    }
}

impl From<&str> for Blob {
    fn from(value: &str) -> Self {
        Blob::from(value.as_bytes())
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob").field("size", &self.0.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_matches_bytes() {
        let blob = Blob::from("ñññ hello");
        assert_eq!(blob.size(), "ñññ hello".len() as u64);
        assert_eq!(&*blob, "ñññ hello".as_bytes());
        assert_eq!(Blob::empty().size(), 0);
    }
}
