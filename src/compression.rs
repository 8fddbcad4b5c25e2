//! Streaming compression for backup artifacts.
//!
//! Grounded on the teacher's `compression.rs`, narrowed from an in-memory
//! `CompressedData` container to file-to-file streaming: backup artifacts
//! are too large to hold twice in memory, and spec.md §4.4 step 5 compresses
//! the artifact on disk, replacing it atomically.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzCompression;
use serde::{Deserialize, Serialize};

use crate::error::{DbManagerError, Result};

/// Supported compression algorithms (spec.md §6 "Compression sniffing").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    Gzip,
    Zstd,
    Lz4,
}

impl CompressionAlgorithm {
    /// File extension appended after compressing (without the leading dot).
    pub fn extension(self) -> &'static str {
        match self {
            CompressionAlgorithm::Gzip => "gz",
            CompressionAlgorithm::Zstd => "zst",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    /// Recognize an algorithm from a file's trailing extension, per the
    /// sniffing rule in spec.md §6.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "gz" => Some(CompressionAlgorithm::Gzip),
            "zst" => Some(CompressionAlgorithm::Zstd),
            "lz4" => Some(CompressionAlgorithm::Lz4),
            _ => None,
        }
    }
}

/// Compress `src` into `dst` using `algorithm` at `level`. The caller removes
/// `src` once this returns (spec.md §4.4 step 5: "atomically remove the
/// original").
pub fn compress_file(
    src: &Path,
    dst: &Path,
    algorithm: CompressionAlgorithm,
    level: i32,
) -> Result<()> {
    let input = File::open(src)?;
    let mut reader = BufReader::new(input);
    let output = File::create(dst)?;
    let writer = BufWriter::new(output);

    match algorithm {
        CompressionAlgorithm::Gzip => {
            let gz_level = GzCompression::new(level.clamp(0, 9) as u32);
            let mut encoder = GzEncoder::new(writer, gz_level);
            std::io::copy(&mut reader, &mut encoder)?;
            encoder.finish()?;
        }
        CompressionAlgorithm::Zstd => {
            let mut encoder = zstd::Encoder::new(writer, level)
                .map_err(|e| DbManagerError::Compression(e.to_string()))?;
            std::io::copy(&mut reader, &mut encoder)
                .map_err(|e| DbManagerError::Compression(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| DbManagerError::Compression(e.to_string()))?;
        }
        CompressionAlgorithm::Lz4 => {
            let mut encoder = lz4::EncoderBuilder::new()
                .level(level.clamp(0, 16) as u32)
                .build(writer)
                .map_err(|e| DbManagerError::Compression(e.to_string()))?;
            std::io::copy(&mut reader, &mut encoder)
                .map_err(|e| DbManagerError::Compression(e.to_string()))?;
            let (_, result) = encoder.finish();
            result.map_err(|e| DbManagerError::Compression(e.to_string()))?;
        }
    }

    Ok(())
}

/// Decompress `src` into `dst`, algorithm chosen by `src`'s extension.
pub fn decompress_file(src: &Path, dst: &Path, algorithm: CompressionAlgorithm) -> Result<()> {
    let input = File::open(src)?;
    let output = File::create(dst)?;
    let mut writer = BufWriter::new(output);

    match algorithm {
        CompressionAlgorithm::Gzip => {
            let mut decoder = GzDecoder::new(BufReader::new(input));
            std::io::copy(&mut decoder, &mut writer)?;
        }
        CompressionAlgorithm::Zstd => {
            let mut decoder = zstd::Decoder::new(BufReader::new(input))
                .map_err(|e| DbManagerError::Compression(e.to_string()))?;
            std::io::copy(&mut decoder, &mut writer)
                .map_err(|e| DbManagerError::Compression(e.to_string()))?;
        }
        CompressionAlgorithm::Lz4 => {
            let mut decoder = lz4::Decoder::new(BufReader::new(input))
                .map_err(|e| DbManagerError::Compression(e.to_string()))?;
            std::io::copy(&mut decoder, &mut writer)
                .map_err(|e| DbManagerError::Compression(e.to_string()))?;
        }
    }

    Ok(())
}

/// Sniff a compression algorithm off a path's extension, if any, per
/// spec.md §6.
pub fn sniff(path: &Path) -> Option<CompressionAlgorithm> {
    let ext = path.extension()?.to_str()?;
    CompressionAlgorithm::from_extension(ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn round_trip(algorithm: CompressionAlgorithm, level: i32) {
        let dir = tempdir().unwrap();
        let src = dir.path().join("artifact.dump");
        let compressed = dir.path().join(format!("artifact.dump.{}", algorithm.extension()));
        let restored = dir.path().join("restored.dump");

        let payload = b"dump payload ".repeat(500);
        std::fs::write(&src, &payload).unwrap();

        compress_file(&src, &compressed, algorithm, level).unwrap();
        assert!(std::fs::metadata(&compressed).unwrap().len() > 0);

        decompress_file(&compressed, &restored, algorithm).unwrap();
        assert_eq!(std::fs::read(&restored).unwrap(), payload);
    }

    #[test]
    fn gzip_round_trip() {
        round_trip(CompressionAlgorithm::Gzip, 6);
    }

    #[test]
    fn zstd_round_trip() {
        round_trip(CompressionAlgorithm::Zstd, 3);
    }

    #[test]
    fn lz4_round_trip() {
        round_trip(CompressionAlgorithm::Lz4, 1);
    }

    #[test]
    fn sniff_recognizes_extensions() {
        assert_eq!(sniff(Path::new("x.dump.gz")), Some(CompressionAlgorithm::Gzip));
        assert_eq!(sniff(Path::new("x.dump.zst")), Some(CompressionAlgorithm::Zstd));
        assert_eq!(sniff(Path::new("x.dump.lz4")), Some(CompressionAlgorithm::Lz4));
        assert_eq!(sniff(Path::new("x.dump")), None);
    }
}
