//! Payload compression algorithms.
//!
//! Compression is applied to the payload of every packet before padding and encryption. The
//! compressor and decompressor keep their state for as long as the keys of the direction stay the
//! same, so every packet is a continuation of one zlib stream.
//!
//! # Supported algorithms
//!
//! - "none" ([`NONE`])
//! - "zlib" ([`ZLIB`])
//! - "zlib@openssh.com" ([`ZLIB_OPENSSH`]), enabled only after user authentication succeeds
use bytes::Bytes;
use derivative::Derivative;
use crate::Result;
pub use self::zlib::{ZLIB, ZLIB_OPENSSH};

mod zlib;

/// Algorithm for compressing packet payloads.
///
/// See the [module documentation][self] for details.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CompressAlgo {
    /// Name of the algorithm.
    pub name: &'static str,
    /// Compression starts only after the user is authenticated.
    pub(crate) delayed: bool,
    #[derivative(Debug = "ignore")]
    pub(crate) make_compress: Option<fn() -> Box<dyn Compress + Send>>,
    #[derivative(Debug = "ignore")]
    pub(crate) make_decompress: Option<fn() -> Box<dyn Decompress + Send>>,
}

/// "none" compression.
pub static NONE: CompressAlgo = CompressAlgo {
    name: "none",
    delayed: false,
    make_compress: None,
    make_decompress: None,
};

pub(crate) trait Compress {
    fn compress(&mut self, payload: &[u8]) -> Result<Bytes>;
}

pub(crate) trait Decompress {
    fn decompress(&mut self, payload: &[u8]) -> Result<Bytes>;
}

/// Looks up a compression algorithm by its name.
pub fn by_name(name: &str) -> Option<&'static CompressAlgo> {
    [&NONE, &ZLIB, &ZLIB_OPENSSH].into_iter().find(|algo| algo.name == name)
}
