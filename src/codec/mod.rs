//! Codec engine: compression codecs, the byte-shuffle transform, and the
//! checksum algorithms.
//!
//! Everything in this module is a pure byte-buffer transform — no I/O, no
//! state.  Compressed payloads are *not* self-describing for every codec, so
//! [`decompress`] always takes the uncompressed length recorded in the
//! block's compression attribute.
//!
//! # Shuffling
//! [`shuffle`] transposes the byte planes of fixed-width items before
//! compression: for 16-bit samples all low bytes end up contiguous, then all
//! high bytes, which compresses markedly better for structured numeric data.
//! Shuffling with an item size of 1 is the identity and is never recorded in
//! the compression attribute.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use sha3::{Sha3_256, Sha3_512};
use thiserror::Error;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error ({codec}): {message}")]
    Compression { codec: &'static str, message: String },
    #[error("Decompression error ({codec}): {message}")]
    Decompression { codec: &'static str, message: String },
    /// Decoding ended before producing the declared uncompressed length.
    #[error("Truncated payload: expected {expected} uncompressed bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("Unknown codec: {0}")]
    UnknownCodec(String),
}

// ── Compression codecs ───────────────────────────────────────────────────────

/// Runtime codec discriminant.
///
/// `Lz4Hc` shares the raw LZ4 block format with `Lz4`; the two attribute
/// tokens round-trip verbatim and decode through the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecId {
    #[default]
    None,
    Zlib,
    Lz4,
    Lz4Hc,
    Zstd,
}

impl CodecId {
    /// Attribute token for this codec (also used in diagnostics).
    pub fn name(self) -> &'static str {
        match self {
            CodecId::None  => "none",
            CodecId::Zlib  => "zlib",
            CodecId::Lz4   => "lz4",
            CodecId::Lz4Hc => "lz4hc",
            CodecId::Zstd  => "zstd",
        }
    }

    /// Parse an attribute token.
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "none"  => Some(CodecId::None),
            "zlib"  => Some(CodecId::Zlib),
            "lz4"   => Some(CodecId::Lz4),
            "lz4hc" => Some(CodecId::Lz4Hc),
            "zstd"  => Some(CodecId::Zstd),
            _       => None,
        }
    }
}

/// Compress `data` with the given codec.  `level` is interpreted per codec
/// (zstd/zlib); the LZ4 paths ignore it.
pub fn compress(data: &[u8], codec: CodecId, level: i32) -> Result<Vec<u8>, CodecError> {
    match codec {
        CodecId::None => Ok(data.to_vec()),
        CodecId::Zstd => zstd::encode_all(data, level)
            .map_err(|e| CodecError::Compression { codec: "zstd", message: e.to_string() }),
        CodecId::Lz4 | CodecId::Lz4Hc => Ok(lz4_flex::block::compress(data)),
        CodecId::Zlib => {
            let lvl = level.clamp(0, 9) as u32;
            let mut enc = ZlibEncoder::new(Vec::new(), flate2::Compression::new(lvl));
            enc.write_all(data)
                .map_err(|e| CodecError::Compression { codec: "zlib", message: e.to_string() })?;
            enc.finish()
                .map_err(|e| CodecError::Compression { codec: "zlib", message: e.to_string() })
        }
    }
}

/// Decompress `data` into exactly `uncompressed_len` bytes.
///
/// Fails with [`CodecError::Truncated`] if decoding produces fewer bytes than
/// declared; the recorded length is authoritative.
pub fn decompress(
    data: &[u8],
    uncompressed_len: usize,
    codec: CodecId,
) -> Result<Vec<u8>, CodecError> {
    let out = match codec {
        CodecId::None => data.to_vec(),
        CodecId::Zstd => zstd::decode_all(data)
            .map_err(|e| CodecError::Decompression { codec: "zstd", message: e.to_string() })?,
        CodecId::Lz4 | CodecId::Lz4Hc => {
            lz4_flex::block::decompress(data, uncompressed_len)
                .map_err(|e| CodecError::Decompression { codec: "lz4", message: e.to_string() })?
        }
        CodecId::Zlib => {
            let mut out = Vec::with_capacity(uncompressed_len);
            ZlibDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| CodecError::Decompression { codec: "zlib", message: e.to_string() })?;
            out
        }
    };
    if out.len() < uncompressed_len {
        return Err(CodecError::Truncated { expected: uncompressed_len, actual: out.len() });
    }
    Ok(out)
}

// ── Byte shuffle ─────────────────────────────────────────────────────────────

/// Transpose item-interleaved bytes into byte-plane order.
///
/// For item size `k` over `n` whole items, output byte `plane*n + i` equals
/// input byte `i*k + plane`.  Trailing `len % k` bytes are copied verbatim.
pub fn shuffle(data: &[u8], item_size: usize) -> Vec<u8> {
    if item_size <= 1 || data.len() < item_size {
        return data.to_vec();
    }
    let n = data.len() / item_size;
    let mut out = Vec::with_capacity(data.len());
    for plane in 0..item_size {
        for i in 0..n {
            out.push(data[i * item_size + plane]);
        }
    }
    out.extend_from_slice(&data[n * item_size..]);
    out
}

/// Exact inverse of [`shuffle`].
pub fn unshuffle(data: &[u8], item_size: usize) -> Vec<u8> {
    if item_size <= 1 || data.len() < item_size {
        return data.to_vec();
    }
    let n = data.len() / item_size;
    let mut out = vec![0u8; data.len()];
    for plane in 0..item_size {
        for i in 0..n {
            out[i * item_size + plane] = data[plane * n + i];
        }
    }
    out[n * item_size..].copy_from_slice(&data[n * item_size..]);
    out
}

// ── Checksums ────────────────────────────────────────────────────────────────

/// Checksum algorithms recordable in a block's checksum attribute.
///
/// Digests are always computed over the bytes as physically stored —
/// compressed bytes when compression is present, raw bytes otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
    Sha512,
    Sha3_256,
    Sha3_512,
}

impl ChecksumAlgorithm {
    /// Canonical attribute token.
    pub fn name(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha1     => "sha1",
            ChecksumAlgorithm::Sha256   => "sha256",
            ChecksumAlgorithm::Sha512   => "sha512",
            ChecksumAlgorithm::Sha3_256 => "sha3-256",
            ChecksumAlgorithm::Sha3_512 => "sha3-512",
        }
    }

    /// Parse an attribute token.  Case-insensitive; the SHA-1/SHA-2 family
    /// accepts both `sha256` and `sha-256` spellings, SHA-3 names are
    /// hyphenated only.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1"     => Some(ChecksumAlgorithm::Sha1),
            "sha256" | "sha-256" => Some(ChecksumAlgorithm::Sha256),
            "sha512" | "sha-512" => Some(ChecksumAlgorithm::Sha512),
            "sha3-256"           => Some(ChecksumAlgorithm::Sha3_256),
            "sha3-512"           => Some(ChecksumAlgorithm::Sha3_512),
            _                    => None,
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            ChecksumAlgorithm::Sha1     => 20,
            ChecksumAlgorithm::Sha256   => 32,
            ChecksumAlgorithm::Sha512   => 64,
            ChecksumAlgorithm::Sha3_256 => 32,
            ChecksumAlgorithm::Sha3_512 => 64,
        }
    }

    /// Hash `data` in one shot.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut hasher = ChecksumHasher::new(self);
        hasher.update(data);
        hasher.finalize()
    }
}

/// Incremental hasher, used for streamed verification of attachments so a
/// multi-gigabyte block never has to be memory-resident just to be checked.
pub enum ChecksumHasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
    Sha3_256(Sha3_256),
    Sha3_512(Sha3_512),
}

impl ChecksumHasher {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha1     => ChecksumHasher::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256   => ChecksumHasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha512   => ChecksumHasher::Sha512(Sha512::new()),
            ChecksumAlgorithm::Sha3_256 => ChecksumHasher::Sha3_256(Sha3_256::new()),
            ChecksumAlgorithm::Sha3_512 => ChecksumHasher::Sha3_512(Sha3_512::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            ChecksumHasher::Sha1(h)     => h.update(data),
            ChecksumHasher::Sha256(h)   => h.update(data),
            ChecksumHasher::Sha512(h)   => h.update(data),
            ChecksumHasher::Sha3_256(h) => h.update(data),
            ChecksumHasher::Sha3_512(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            ChecksumHasher::Sha1(h)     => h.finalize().to_vec(),
            ChecksumHasher::Sha256(h)   => h.finalize().to_vec(),
            ChecksumHasher::Sha512(h)   => h.finalize().to_vec(),
            ChecksumHasher::Sha3_256(h) => h.finalize().to_vec(),
            ChecksumHasher::Sha3_512(h) => h.finalize().to_vec(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
