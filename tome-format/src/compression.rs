use std::fmt;
use std::io::Result;
use std::str::FromStr;

use crate::error::ConfigurationError;

pub mod constants {
    pub const COMPRESSION_STORED: u8 = 0x00;
    pub const COMPRESSION_DEFLATE: u8 = 0x10;
    pub const COMPRESSION_ZSTD: u8 = 0x20;
    pub const COMPRESSION_XZ: u8 = 0x30;
}

use self::constants::*;

/// Default minimum chunk size: 2MB (2,097,152 bytes).
pub const DEFAULT_CHUNK_SIZE: u32 = 2_097_152;

const ZSTD_LEVEL: i32 = 19;
const XZ_LEVEL: u32 = 6;

#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub enum Compression {
    Stored,
    Deflate,
    Xz,
    Zstd,
    Unknown(u8),
}

impl Default for Compression {
    fn default() -> Self {
        Self::Zstd
    }
}

impl Compression {
    /// Every algorithm this build can write and read.
    pub const ALL: &'static [Compression] = &[
        Compression::Stored,
        #[cfg(feature = "deflate")]
        Compression::Deflate,
        #[cfg(feature = "xz")]
        Compression::Xz,
        #[cfg(feature = "zstd")]
        Compression::Zstd,
    ];

    /// Every algorithm with a name, whether or not it was compiled in.
    const KNOWN: [Compression; 4] = [
        Compression::Stored,
        Compression::Deflate,
        Compression::Xz,
        Compression::Zstd,
    ];

    pub const fn available_variants() -> &'static [&'static str] {
        &[
            "none",
            #[cfg(feature = "deflate")]
            "deflate",
            #[cfg(feature = "xz")]
            "xz",
            #[cfg(feature = "zstd")]
            "zstd",
        ]
    }

    /// Whether support for this algorithm was compiled in.
    pub fn is_available(self) -> bool {
        Compression::ALL.contains(&self)
    }

    fn check_available(self) -> std::result::Result<Compression, ConfigurationError> {
        match self {
            Compression::Unknown(id) => Err(ConfigurationError::UnknownCompressionId(id)),
            compression if compression.is_available() => Ok(compression),
            compression => Err(ConfigurationError::UnsupportedCompression(compression.name())),
        }
    }

    /// The name this algorithm is selected by.
    pub const fn name(self) -> &'static str {
        use Compression::*;

        match self {
            Stored => "none",
            Deflate => "deflate",
            Xz => "xz",
            Zstd => "zstd",
            Unknown(_) => "unknown",
        }
    }

    pub const fn id(self) -> u8 {
        use Compression::*;

        match self {
            Stored => COMPRESSION_STORED,
            Deflate => COMPRESSION_DEFLATE,
            Zstd => COMPRESSION_ZSTD,
            Xz => COMPRESSION_XZ,
            Unknown(id) => id,
        }
    }

    /// Maps an on-disk id to an algorithm, keeping unrecognised ids as `Unknown`.
    pub(crate) const fn from_id_lossy(id: u8) -> Compression {
        use Compression::*;

        match id {
            COMPRESSION_STORED => Stored,
            COMPRESSION_DEFLATE => Deflate,
            COMPRESSION_ZSTD => Zstd,
            COMPRESSION_XZ => Xz,
            id => Unknown(id),
        }
    }

    pub fn from_id(id: u8) -> std::result::Result<Compression, ConfigurationError> {
        Self::from_id_lossy(id).check_available()
    }
}

impl FromStr for Compression {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Compression::KNOWN
            .iter()
            .copied()
            .find(|c| c.name() == s)
            .ok_or_else(|| ConfigurationError::UnknownCompression(s.to_string()))?
            .check_available()
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Compression::*;

        let s = match self {
            Stored => "stored",
            Deflate => "DEFLATE",
            Xz => "xz",
            Zstd => "Zstandard",
            Unknown(id) => return write!(f, "Unknown(id: {:x})", id),
        };

        write!(f, "{}", s)
    }
}

impl fmt::Debug for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A caller's choice of compression, resolved when a writer is created.
///
/// Accepts the enumerated value itself, its name (`"zstd"`) or its on-disk id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionSpec {
    Value(Compression),
    Name(String),
    Id(u8),
}

impl CompressionSpec {
    pub fn resolve(&self) -> std::result::Result<Compression, ConfigurationError> {
        match self {
            CompressionSpec::Value(compression) => compression.check_available(),
            CompressionSpec::Name(name) => name.parse(),
            CompressionSpec::Id(id) => Compression::from_id(*id),
        }
    }
}

impl Default for CompressionSpec {
    fn default() -> Self {
        CompressionSpec::Value(Compression::default())
    }
}

impl From<Compression> for CompressionSpec {
    fn from(value: Compression) -> Self {
        CompressionSpec::Value(value)
    }
}

impl From<&str> for CompressionSpec {
    fn from(value: &str) -> Self {
        CompressionSpec::Name(value.to_string())
    }
}

impl From<String> for CompressionSpec {
    fn from(value: String) -> Self {
        CompressionSpec::Name(value)
    }
}

impl From<u8> for CompressionSpec {
    fn from(value: u8) -> Self {
        CompressionSpec::Id(value)
    }
}

/// Compress a whole chunk in memory.
pub fn compress_bytes(data: &[u8], compression: Compression) -> Result<Vec<u8>> {
    use Compression::*;

    match compression {
        Stored => Ok(data.to_vec()),
        #[cfg(feature = "deflate")]
        Deflate => {
            use std::io::Write;

            let mut encoder =
                flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
        #[cfg(feature = "xz")]
        Xz => {
            use std::io::Write;

            let mut encoder = xz2::write::XzEncoder::new(Vec::new(), XZ_LEVEL);
            encoder.write_all(data)?;
            encoder.finish()
        }
        #[cfg(feature = "zstd")]
        Zstd => ::zstd::encode_all(data, ZSTD_LEVEL),
        Unknown(id) => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Cannot handle compression with id {}", id),
        )),
        #[allow(unreachable_patterns)]
        missing => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Compiled without support for {:?}", missing),
        )),
    }
}

// Generous for text, still bounded by what is actually on disk.
const MAX_HINT_RATIO: usize = 64;

#[inline(always)]
fn capacity_hint(data: &[u8], hint: usize) -> usize {
    hint.min(data.len().saturating_mul(MAX_HINT_RATIO))
}

/// Decompress a whole chunk in memory. `hint` is the expected decompressed size.
///
/// The hint only sizes the initial buffer, capped relative to the input, so a
/// bogus hint cannot force a huge allocation. Callers check the output length.
pub fn decompress_bytes(data: &[u8], compression: Compression, hint: usize) -> Result<Vec<u8>> {
    use Compression::*;

    match compression {
        Stored => Ok(data.to_vec()),
        #[cfg(feature = "deflate")]
        Deflate => {
            use std::io::Read;

            let mut out = Vec::with_capacity(capacity_hint(data, hint));
            flate2::read::DeflateDecoder::new(data).read_to_end(&mut out)?;
            Ok(out)
        }
        #[cfg(feature = "xz")]
        Xz => {
            use std::io::Read;

            let mut out = Vec::with_capacity(capacity_hint(data, hint));
            xz2::read::XzDecoder::new(data).read_to_end(&mut out)?;
            Ok(out)
        }
        #[cfg(feature = "zstd")]
        Zstd => ::zstd::decode_all(data),
        Unknown(id) => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Cannot handle decompression with id {}", id),
        )),
        #[allow(unreachable_patterns)]
        missing => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Compiled without support for {:?}", missing),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_name_resolves() {
        for name in Compression::available_variants() {
            let compression: Compression = name.parse().unwrap();
            assert_eq!(compression.name(), *name);
            assert_eq!(
                CompressionSpec::from(*name).resolve().unwrap(),
                compression
            );
        }
    }

    #[test]
    fn every_value_resolves() {
        for compression in Compression::ALL.iter().copied() {
            assert_eq!(
                CompressionSpec::from(compression).resolve().unwrap(),
                compression
            );
            assert_eq!(
                CompressionSpec::from(compression.id()).resolve().unwrap(),
                compression
            );
        }
    }

    #[test]
    fn unknown_names_fail_closed() {
        assert!(matches!(
            "toto".parse::<Compression>(),
            Err(ConfigurationError::UnknownCompression(name)) if name == "toto"
        ));
        // Names are case-sensitive.
        assert!("ZSTD".parse::<Compression>().is_err());
        assert!(matches!(
            CompressionSpec::from(0x7fu8).resolve(),
            Err(ConfigurationError::UnknownCompressionId(0x7f))
        ));
        assert!(CompressionSpec::from(Compression::Unknown(3))
            .resolve()
            .is_err());
    }

    #[test]
    fn roundtrip_all() {
        let data = b"This, this, this, this, this is a compressable string string string.\n"
            .repeat(20);

        for compression in Compression::ALL.iter().copied() {
            let compressed = compress_bytes(&data, compression).unwrap();
            let decompressed = decompress_bytes(&compressed, compression, data.len()).unwrap();
            assert_eq!(decompressed, data, "{}", compression);
        }
    }

    #[test]
    fn every_listed_variant_is_available() {
        assert_eq!(Compression::ALL.len(), Compression::available_variants().len());
        for compression in Compression::ALL {
            assert!(compression.is_available());
            assert!(Compression::available_variants().contains(&compression.name()));
        }
    }

    #[cfg(not(feature = "xz"))]
    #[test]
    fn disabled_backends_are_rejected_up_front() {
        assert!(matches!(
            CompressionSpec::from("xz").resolve(),
            Err(ConfigurationError::UnsupportedCompression("xz"))
        ));
        assert!(CompressionSpec::from(Compression::Xz).resolve().is_err());
    }

    #[test]
    fn bogus_hint_is_capped() {
        let data = b"abcabcabcabc".repeat(10);
        for compression in Compression::ALL.iter().copied() {
            let compressed = compress_bytes(&data, compression).unwrap();
            assert!(capacity_hint(&compressed, usize::MAX / 2) <= compressed.len() * MAX_HINT_RATIO);
            let decompressed = decompress_bytes(&compressed, compression, usize::MAX / 2).unwrap();
            assert_eq!(decompressed, data, "{}", compression);
        }
    }

    #[test]
    fn unknown_id_cannot_compress() {
        assert!(compress_bytes(b"abc", Compression::Unknown(0x99)).is_err());
        assert!(decompress_bytes(b"abc", Compression::Unknown(0x99), 3).is_err());
    }
}
