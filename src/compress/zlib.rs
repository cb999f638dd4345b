use bytes::Bytes;
use flate2::{Compression, FlushCompress, FlushDecompress};
use crate::{Error, Result};
use crate::codec::MAX_PACKET_LEN;
use super::{CompressAlgo, Compress, Decompress};

/// "zlib" compression from RFC 4253.
pub static ZLIB: CompressAlgo = CompressAlgo {
    name: "zlib",
    delayed: false,
    make_compress: Some(|| Box::new(ZlibCompress::new())),
    make_decompress: Some(|| Box::new(ZlibDecompress::new())),
};

/// "zlib@openssh.com" compression, which is the same as [`ZLIB`] but starts only after
/// authentication.
pub static ZLIB_OPENSSH: CompressAlgo = CompressAlgo {
    name: "zlib@openssh.com",
    delayed: true,
    make_compress: Some(|| Box::new(ZlibCompress::new())),
    make_decompress: Some(|| Box::new(ZlibDecompress::new())),
};

const SCRATCH_LEN: usize = 16 * 1024;

struct ZlibCompress {
    compressor: flate2::Compress,
    scratch: Vec<u8>,
}

impl ZlibCompress {
    fn new() -> Self {
        Self {
            compressor: flate2::Compress::new(Compression::default(), true),
            scratch: vec![0; SCRATCH_LEN],
        }
    }
}

impl Compress for ZlibCompress {
    fn compress(&mut self, payload: &[u8]) -> Result<Bytes> {
        let mut compressed = Vec::with_capacity(payload.len() / 2 + 16);
        let mut input = payload;
        loop {
            let before_in = self.compressor.total_in();
            let before_out = self.compressor.total_out();

            self.compressor.compress(input, &mut self.scratch, FlushCompress::Sync)
                .map_err(|_| Error::Compress("deflate failed"))?;

            let consumed = (self.compressor.total_in() - before_in) as usize;
            let produced = (self.compressor.total_out() - before_out) as usize;
            compressed.extend_from_slice(&self.scratch[..produced]);
            input = &input[consumed..];

            // the flush is complete once deflate stops filling the whole output buffer
            if input.is_empty() && produced < self.scratch.len() {
                break
            }
        }
        Ok(compressed.into())
    }
}

struct ZlibDecompress {
    decompressor: flate2::Decompress,
    scratch: Vec<u8>,
}

impl ZlibDecompress {
    fn new() -> Self {
        Self {
            decompressor: flate2::Decompress::new(true),
            scratch: vec![0; SCRATCH_LEN],
        }
    }
}

impl Decompress for ZlibDecompress {
    fn decompress(&mut self, payload: &[u8]) -> Result<Bytes> {
        let mut decompressed = Vec::with_capacity(payload.len() * 2);
        let mut input = payload;
        loop {
            let before_in = self.decompressor.total_in();
            let before_out = self.decompressor.total_out();

            let status = self.decompressor.decompress(input, &mut self.scratch, FlushDecompress::Sync)
                .map_err(|_| Error::Compress("inflate failed"))?;

            let consumed = (self.decompressor.total_in() - before_in) as usize;
            let produced = (self.decompressor.total_out() - before_out) as usize;
            decompressed.extend_from_slice(&self.scratch[..produced]);
            input = &input[consumed..];

            if decompressed.len() > MAX_PACKET_LEN {
                return Err(Error::Compress("decompressed payload is too long"))
            }
            if status == flate2::Status::StreamEnd {
                return Err(Error::Compress("zlib stream ended unexpectedly"))
            }
            if input.is_empty() && produced < self.scratch.len() {
                break
            }
            if consumed == 0 && produced == 0 {
                return Err(Error::Compress("inflate made no progress"))
            }
        }
        Ok(decompressed.into())
    }
}
