//! Block model: the write-side pipeline ([`OutputBlock`]) and the read-side
//! lazy representation ([`InputBlock`]) of a single payload block.
//!
//! # Write side
//! An [`OutputBlock`] owns its logical bytes until compression runs.  The
//! pipeline order is fixed: optional shuffle, compression, checksum over the
//! stored form, then placement (inline, embedded, or attachment — decided by
//! the layout engine from the stored size).
//!
//! # Read side
//! An [`InputBlock`] reads nothing from the channel until [`InputBlock::load`]
//! is called.  Loading verifies the checksum first — streamed in 4096-byte
//! chunks for attachments, in memory for resident bytes — then decompresses,
//! unshuffles, and caches the logical payload.  A loaded block never
//! re-reads; verification is idempotent.

use std::io::{Read, Seek, SeekFrom};

use log::{debug, trace};

use crate::codec::{self, ChecksumAlgorithm, ChecksumHasher, CodecId};
use crate::error::{Result, XisfError};
use crate::grammar::{ChecksumInfo, CompressionInfo, InlineEncoding, Location};

/// Blocks smaller than this are stored uncompressed even when a codec is
/// configured; the codec framing would cost more than it saves.
pub const MIN_COMPRESSIBLE_SIZE: usize = 64;

/// Largest stored size that is still inlined into the header markup instead
/// of being appended as an attachment.
pub const MAX_INLINE_SIZE: usize = 3072;

/// Chunk size for streamed checksum verification.
const VERIFY_CHUNK_SIZE: usize = 4096;

// ── Write side ───────────────────────────────────────────────────────────────

/// A block being assembled for writing.
#[derive(Debug, Default)]
pub struct OutputBlock {
    data: Option<Vec<u8>>,
    compressed: Option<Vec<u8>>,
    pub compression: Option<CompressionInfo>,
    pub checksum: Option<ChecksumInfo>,
    /// Location text currently present in the serialized markup.  Starts as
    /// a unique token and is rewritten to the real offset text by each
    /// stabilization pass.
    pub placeholder: String,
    /// Final byte offset, filled in once the layout has stabilized.
    pub position: u64,
}

impl OutputBlock {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: Some(data), ..Default::default() }
    }

    /// Run the compression step of the pipeline.
    ///
    /// Blocks under [`MIN_COMPRESSIBLE_SIZE`] and codec `None` keep the
    /// logical buffer as the stored form; otherwise the logical buffer is
    /// shuffled (when requested with `item_size > 1`), compressed, and
    /// discarded in favour of the compressed form.
    pub fn compress(
        &mut self,
        codec: CodecId,
        level: i32,
        item_size: usize,
        shuffle: bool,
    ) -> Result<()> {
        let logical_len = self.data.as_deref().map_or(0, <[u8]>::len);
        if codec == CodecId::None || logical_len < MIN_COMPRESSIBLE_SIZE {
            return Ok(());
        }
        let logical = self.data.take().unwrap_or_default();
        let use_shuffle = shuffle && item_size > 1;

        let packed = if use_shuffle {
            let shuffled = codec::shuffle(&logical, item_size);
            codec::compress(&shuffled, codec, level)?
        } else {
            codec::compress(&logical, codec, level)?
        };
        trace!(
            "compressed block: {} -> {} bytes ({}{})",
            logical.len(),
            packed.len(),
            codec.name(),
            if use_shuffle { "+sh" } else { "" }
        );
        self.compression = Some(CompressionInfo::new(codec, logical.len(), item_size, use_shuffle));
        self.compressed = Some(packed);
        Ok(())
    }

    /// Compute the checksum over the stored form.  Must run after
    /// [`OutputBlock::compress`]; the digest covers the bytes as physically
    /// stored, never the logical payload.
    pub fn compute_checksum(&mut self, algorithm: ChecksumAlgorithm) {
        let digest = algorithm.digest(self.stored());
        self.checksum = Some(ChecksumInfo::from_digest(algorithm, &digest));
    }

    /// The bytes as they will appear in the file.
    pub fn stored(&self) -> &[u8] {
        self.compressed.as_deref().or(self.data.as_deref()).unwrap_or_default()
    }

    pub fn stored_len(&self) -> usize {
        self.stored().len()
    }

    /// Whether the stored form fits into the header markup.
    pub fn is_inlineable(&self) -> bool {
        self.stored_len() <= MAX_INLINE_SIZE
    }

    /// Encode the stored form as inline/embedded text.
    pub fn encode_text(&self, encoding: InlineEncoding) -> String {
        match encoding {
            InlineEncoding::Base64 => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD.encode(self.stored())
            }
            InlineEncoding::Base16 => hex::encode(self.stored()),
        }
    }
}

// ── Read side ────────────────────────────────────────────────────────────────

/// A parsed block, loaded lazily from the channel.
#[derive(Debug)]
pub struct InputBlock {
    pub location: Location,
    pub compression: Option<CompressionInfo>,
    pub checksum: Option<ChecksumInfo>,
    /// Stored bytes already resident from the header (inline/embedded).
    stored: Option<Vec<u8>>,
    /// Decompressed logical payload, filled on first load.
    cache: Option<Vec<u8>>,
    verified: bool,
}

impl InputBlock {
    /// Block whose stored bytes came decoded out of the header markup.
    pub fn resident(
        location: Location,
        stored: Vec<u8>,
        compression: Option<CompressionInfo>,
        checksum: Option<ChecksumInfo>,
    ) -> Self {
        Self { location, compression, checksum, stored: Some(stored), cache: None, verified: false }
    }

    /// Attachment block; bytes stay on the channel until loaded.
    pub fn attached(
        location: Location,
        compression: Option<CompressionInfo>,
        checksum: Option<ChecksumInfo>,
    ) -> Self {
        Self { location, compression, checksum, stored: None, cache: None, verified: false }
    }

    /// Logical payload length, without loading anything.
    pub fn logical_len(&self) -> usize {
        match (&self.compression, &self.location) {
            (Some(c), _) => c.uncompressed_size,
            (None, Location::Attachment { size, .. }) => *size as usize,
            (None, _) => self.stored.as_deref().map_or(0, <[u8]>::len),
        }
    }

    /// Return the logical payload, reading, verifying, and decoding it on
    /// first use.  Subsequent calls return the cache without touching the
    /// channel.
    pub fn load<R: Read + Seek>(&mut self, src: &mut R) -> Result<&[u8]> {
        if self.cache.is_none() {
            let logical = self.materialize(src)?;
            self.cache = Some(logical);
        }
        Ok(self.cache.as_deref().unwrap_or_default())
    }

    fn materialize<R: Read + Seek>(&mut self, src: &mut R) -> Result<Vec<u8>> {
        let stored = match self.location {
            Location::Attachment { position, size } => {
                if let Some(ck) = &self.checksum {
                    if !self.verified {
                        verify_streamed(src, position, size, ck)?;
                        self.verified = true;
                    }
                }
                debug!("loading attachment: offset {position}, {size} bytes");
                src.seek(SeekFrom::Start(position))?;
                let mut buf = vec![0u8; size as usize];
                src.read_exact(&mut buf)?;
                buf
            }
            Location::Inline(_) | Location::Embedded => {
                if let Some(ck) = &self.checksum {
                    if !self.verified {
                        let resident = self.stored.as_deref().unwrap_or_default();
                        let computed = ck.algorithm.digest(resident);
                        if !ck.matches(&computed) {
                            return Err(XisfError::Checksum {
                                expected: ck.digest.clone(),
                                computed: hex::encode(computed),
                            });
                        }
                        self.verified = true;
                    }
                }
                self.stored.take().unwrap_or_default()
            }
        };

        match &self.compression {
            Some(c) => {
                let raw = codec::decompress(&stored, c.uncompressed_size, c.codec)?;
                if c.needs_unshuffle() {
                    Ok(codec::unshuffle(&raw, c.item_size))
                } else {
                    Ok(raw)
                }
            }
            None => Ok(stored),
        }
    }
}

/// Hash an attachment region chunk by chunk, so verification never requires
/// the whole block in memory, and compare against the recorded digest.
fn verify_streamed<R: Read + Seek>(
    src: &mut R,
    position: u64,
    size: u64,
    checksum: &ChecksumInfo,
) -> Result<()> {
    src.seek(SeekFrom::Start(position))?;
    let mut hasher = ChecksumHasher::new(checksum.algorithm);
    let mut remaining = size;
    let mut chunk = [0u8; VERIFY_CHUNK_SIZE];
    while remaining > 0 {
        let take = remaining.min(VERIFY_CHUNK_SIZE as u64) as usize;
        src.read_exact(&mut chunk[..take])?;
        hasher.update(&chunk[..take]);
        remaining -= take as u64;
    }
    let computed = hasher.finalize();
    if !checksum.matches(&computed) {
        return Err(XisfError::Checksum {
            expected: checksum.digest.clone(),
            computed: hex::encode(computed),
        });
    }
    trace!("attachment checksum verified: {}", checksum.to_attribute());
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn small_blocks_are_never_compressed() {
        let mut block = OutputBlock::new(sample(MIN_COMPRESSIBLE_SIZE - 1));
        block.compress(CodecId::Zstd, 3, 1, false).unwrap();
        assert!(block.compression.is_none());
        assert_eq!(block.stored(), sample(MIN_COMPRESSIBLE_SIZE - 1).as_slice());
    }

    #[test]
    fn floor_is_exactly_sixty_four() {
        let mut block = OutputBlock::new(sample(MIN_COMPRESSIBLE_SIZE));
        block.compress(CodecId::Zstd, 3, 1, false).unwrap();
        assert!(block.compression.is_some());
    }

    #[test]
    fn none_codec_keeps_logical_bytes() {
        let data = sample(1000);
        let mut block = OutputBlock::new(data.clone());
        block.compress(CodecId::None, 0, 1, false).unwrap();
        assert!(block.compression.is_none());
        assert_eq!(block.stored(), data.as_slice());
    }

    #[test]
    fn shuffle_with_item_size_one_is_not_recorded() {
        let mut block = OutputBlock::new(sample(1000));
        block.compress(CodecId::Zstd, 3, 1, true).unwrap();
        let info = block.compression.unwrap();
        assert!(!info.shuffled);
        assert!(!info.to_attribute().contains("+sh"));
        assert_eq!(info.to_attribute(), "zstd:1000");
    }

    #[test]
    fn shuffle_is_recorded_with_wide_items() {
        let mut block = OutputBlock::new(sample(1000));
        block.compress(CodecId::Lz4, 0, 2, true).unwrap();
        let info = block.compression.as_ref().unwrap();
        assert_eq!(info.to_attribute(), "lz4+sh:1000:2");
    }

    #[test]
    fn checksum_covers_stored_bytes_not_logical() {
        let data = sample(1000);
        let mut block = OutputBlock::new(data.clone());
        block.compress(CodecId::Zstd, 3, 1, false).unwrap();
        block.compute_checksum(ChecksumAlgorithm::Sha256);

        let over_stored = ChecksumAlgorithm::Sha256.digest(block.stored());
        let over_logical = ChecksumAlgorithm::Sha256.digest(&data);
        let recorded = &block.checksum.as_ref().unwrap().digest;
        assert_eq!(recorded, &hex::encode(over_stored));
        assert_ne!(recorded, &hex::encode(over_logical));
    }

    #[test]
    fn inline_threshold_boundary() {
        let at_limit = OutputBlock::new(sample(MAX_INLINE_SIZE));
        assert!(at_limit.is_inlineable());
        let over_limit = OutputBlock::new(sample(MAX_INLINE_SIZE + 1));
        assert!(!over_limit.is_inlineable());
    }

    #[test]
    fn output_to_input_roundtrip_via_attachment() {
        let data = sample(5000);
        let mut out = OutputBlock::new(data.clone());
        out.compress(CodecId::Zlib, 6, 2, true).unwrap();
        out.compute_checksum(ChecksumAlgorithm::Sha1);

        // Lay the stored bytes at offset 8192 of a synthetic channel.
        let mut channel = vec![0u8; 8192];
        channel.extend_from_slice(out.stored());
        let location = Location::Attachment { position: 8192, size: out.stored_len() as u64 };

        let mut input = InputBlock::attached(location, out.compression.clone(), out.checksum.clone());
        let mut cursor = Cursor::new(channel);
        assert_eq!(input.load(&mut cursor).unwrap(), data.as_slice());
        // Second load must come from the cache even on a truncated channel.
        let mut empty = Cursor::new(Vec::new());
        assert_eq!(input.load(&mut empty).unwrap(), data.as_slice());
    }

    #[test]
    fn resident_block_checksum_mismatch_is_fatal() {
        let data = sample(100);
        let mut stored = data.clone();
        let checksum = ChecksumInfo::from_digest(
            ChecksumAlgorithm::Sha256,
            &ChecksumAlgorithm::Sha256.digest(&data),
        );
        stored[17] ^= 0xff;
        let mut block = InputBlock::resident(
            Location::Inline(InlineEncoding::Base64),
            stored,
            None,
            Some(checksum),
        );
        let mut cursor = Cursor::new(Vec::new());
        let err = block.load(&mut cursor).unwrap_err();
        assert!(matches!(err, XisfError::Checksum { .. }));
    }

    #[test]
    fn streamed_verification_catches_corruption() {
        let data = sample(10_000);
        let checksum = ChecksumInfo::from_digest(
            ChecksumAlgorithm::Sha512,
            &ChecksumAlgorithm::Sha512.digest(&data),
        );
        let mut channel = vec![0u8; 4096];
        channel.extend_from_slice(&data);
        channel[4096 + 9999] ^= 0x01;

        let location = Location::Attachment { position: 4096, size: data.len() as u64 };
        let mut block = InputBlock::attached(location, None, Some(checksum));
        let err = block.load(&mut Cursor::new(channel)).unwrap_err();
        assert!(matches!(err, XisfError::Checksum { .. }));
    }
}
