use std::io::{Read, Write};

use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;

use super::{Root, RootContext, COMPRESSION_SEQUENCE};
use crate::error::{AcornError, AcornResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    Gzip,
    Deflate,
}

impl CompressionAlgorithm {
    fn label(self) -> &'static str {
        match self {
            CompressionAlgorithm::Gzip => "gzip",
            CompressionAlgorithm::Deflate => "deflate",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompressionOptions {
    pub algorithm: CompressionAlgorithm,
    /// flate2 level, 0-9.
    pub level: u32,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        CompressionOptions {
            algorithm: CompressionAlgorithm::Gzip,
            level: 6,
        }
    }
}

pub struct CompressionRoot {
    options: CompressionOptions,
}

impl CompressionRoot {
    pub fn new(options: CompressionOptions) -> Self {
        CompressionRoot { options }
    }

    pub fn gzip() -> Self {
        CompressionRoot::new(CompressionOptions::default())
    }
}

impl Root for CompressionRoot {
    fn name(&self) -> &str {
        "compression"
    }

    fn sequence(&self) -> i32 {
        COMPRESSION_SEQUENCE
    }

    fn on_stash(&self, bytes: Vec<u8>, ctx: &mut RootContext) -> AcornResult<Vec<u8>> {
        let level = Compression::new(self.options.level);
        let out = match self.options.algorithm {
            CompressionAlgorithm::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), level);
                encoder.write_all(&bytes)?;
                encoder.finish()?
            }
            CompressionAlgorithm::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), level);
                encoder.write_all(&bytes)?;
                encoder.finish()?
            }
        };
        ctx.transformation_signatures
            .push(format!("{}:{}", self.options.algorithm.label(), self.options.level));
        Ok(out)
    }

    fn on_crack(&self, bytes: Vec<u8>, _ctx: &mut RootContext) -> AcornResult<Vec<u8>> {
        let mut out = Vec::new();
        let result = match self.options.algorithm {
            CompressionAlgorithm::Gzip => GzDecoder::new(bytes.as_slice()).read_to_end(&mut out),
            CompressionAlgorithm::Deflate => {
                DeflateDecoder::new(bytes.as_slice()).read_to_end(&mut out)
            }
        };
        result.map_err(|e| AcornError::Deserialization(format!("decompression failed: {e}")))?;
        Ok(out)
    }
}
