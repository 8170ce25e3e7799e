//! Compression and decompression stages: gzip, bzip2, and lzma (xz).
//!
//! Encoders and decoders stream through a bounded chunk loop so the output
//! cap and the wall-clock deadline are enforced mid-stage, not after the
//! buffer has already ballooned.

use crate::error::{FsError, FsResult};
use crate::transform::Deadline;
use std::io::Read;

const CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Gzip,
    Bzip2,
    Lzma,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Gzip => "gzip",
            Algorithm::Bzip2 => "bzip2",
            Algorithm::Lzma => "lzma",
        }
    }

    pub fn parse(s: &str) -> FsResult<Self> {
        match s {
            "gzip" | "gz" => Ok(Algorithm::Gzip),
            "bzip2" | "bz2" => Ok(Algorithm::Bzip2),
            "lzma" | "xz" => Ok(Algorithm::Lzma),
            other => Err(FsError::InvalidInput(format!("unknown compression algorithm '{other}'"))),
        }
    }
}

/// Drain a reader into a Vec, bailing out on the byte cap or the deadline.
fn read_bounded(
    mut reader: impl Read,
    max_output: u64,
    deadline: &Deadline,
) -> FsResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; CHUNK];
    loop {
        deadline.check()?;
        let n = reader
            .read(&mut chunk)
            .map_err(|e| FsError::InvalidInput(format!("codec error: {e}")))?;
        if n == 0 {
            return Ok(out);
        }
        if out.len() as u64 + n as u64 > max_output {
            return Err(FsError::InvalidInput(format!(
                "codec output exceeds {max_output} bytes"
            )));
        }
        out.extend_from_slice(&chunk[..n]);
    }
}

pub fn compress(
    algorithm: Algorithm,
    level: u32,
    bytes: &[u8],
    max_output: u64,
    deadline: &Deadline,
) -> FsResult<Vec<u8>> {
    match algorithm {
        Algorithm::Gzip => {
            let encoder =
                flate2::read::GzEncoder::new(bytes, flate2::Compression::new(level.min(9)));
            read_bounded(encoder, max_output, deadline)
        }
        Algorithm::Bzip2 => {
            let encoder =
                bzip2::read::BzEncoder::new(bytes, bzip2::Compression::new(level.clamp(1, 9)));
            read_bounded(encoder, max_output, deadline)
        }
        Algorithm::Lzma => {
            let encoder = xz2::read::XzEncoder::new(bytes, level.min(9));
            read_bounded(encoder, max_output, deadline)
        }
    }
}

pub fn decompress(
    algorithm: Algorithm,
    bytes: &[u8],
    max_output: u64,
    deadline: &Deadline,
) -> FsResult<Vec<u8>> {
    match algorithm {
        Algorithm::Gzip => {
            read_bounded(flate2::read::GzDecoder::new(bytes), max_output, deadline)
        }
        Algorithm::Bzip2 => {
            read_bounded(bzip2::read::BzDecoder::new(bytes), max_output, deadline)
        }
        Algorithm::Lzma => read_bounded(xz2::read::XzDecoder::new(bytes), max_output, deadline),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(30))
    }

    const MAX: u64 = 10 * 1024 * 1024;

    #[test]
    fn round_trip_every_algorithm() {
        let input = b"the quick brown fox jumps over the lazy dog".repeat(100);
        for algorithm in [Algorithm::Gzip, Algorithm::Bzip2, Algorithm::Lzma] {
            let packed = compress(algorithm, 6, &input, MAX, &deadline()).unwrap();
            assert_ne!(packed, input, "{algorithm:?} produced identity output");
            let unpacked = decompress(algorithm, &packed, MAX, &deadline()).unwrap();
            assert_eq!(unpacked, input, "{algorithm:?} round trip");
        }
    }

    #[test]
    fn round_trip_empty_and_single_byte() {
        for algorithm in [Algorithm::Gzip, Algorithm::Bzip2, Algorithm::Lzma] {
            for input in [&b""[..], &b"x"[..]] {
                let packed = compress(algorithm, 6, input, MAX, &deadline()).unwrap();
                let unpacked = decompress(algorithm, &packed, MAX, &deadline()).unwrap();
                assert_eq!(unpacked, input);
            }
        }
    }

    #[test]
    fn output_cap_is_enforced() {
        let input = vec![0u8; 1024 * 1024];
        let packed = compress(Algorithm::Gzip, 6, &input, MAX, &deadline()).unwrap();
        let err = decompress(Algorithm::Gzip, &packed, 1024, &deadline()).unwrap_err();
        assert!(matches!(err, FsError::InvalidInput(_)));
    }

    #[test]
    fn corrupt_input_fails_cleanly() {
        let err = decompress(Algorithm::Gzip, b"not gzip at all", MAX, &deadline()).unwrap_err();
        assert!(matches!(err, FsError::InvalidInput(_)));
    }

    #[test]
    fn algorithm_names_parse_back() {
        for algorithm in [Algorithm::Gzip, Algorithm::Bzip2, Algorithm::Lzma] {
            assert_eq!(Algorithm::parse(algorithm.name()).unwrap(), algorithm);
        }
        assert!(Algorithm::parse("zstd").is_err());
    }
}
