//! The three textual mini-grammars used in block attributes.
//!
//! These are parsed and serialized independently of XML mechanics:
//!
//! - location:    `attachment:<offset>:<size>` | `inline:<encoding>` | `embedded`
//! - compression: `<codec>[+sh]:<uncompressedSize>[:<itemSize>]`
//! - checksum:    `<algorithm>:<hexDigest>`
//!
//! Attachment offsets parsed from a header additionally carry a minimum
//! block position floor (the aligned header end).  An offset below that
//! floor points inside the header and is a structural error, surfaced at
//! parse time rather than deferred to data-load time.

use crate::codec::{ChecksumAlgorithm, CodecId};
use crate::error::{Result, XisfError};

// ── Location ─────────────────────────────────────────────────────────────────

/// Text encoding for inline and embedded block data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineEncoding {
    Base64,
    Base16,
}

impl InlineEncoding {
    pub fn name(self) -> &'static str {
        match self {
            InlineEncoding::Base64 => "base64",
            InlineEncoding::Base16 => "base16",
        }
    }
}

/// Physical location of a block's stored bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Byte-aligned region after the header.
    Attachment { position: u64, size: u64 },
    /// Encoded text directly in the location-bearing element.
    Inline(InlineEncoding),
    /// Encoded text in a child `<Data>` element.
    Embedded,
}

impl Location {
    /// Parse a location attribute value.  `min_position` is the aligned end
    /// of the header; attachment offsets below it are rejected.
    pub fn parse(text: &str, min_position: u64) -> Result<Self> {
        let mut parts = text.split(':');
        match parts.next() {
            Some("attachment") => {
                let position = parse_u64_field(parts.next(), text, "offset")?;
                let size = parse_u64_field(parts.next(), text, "size")?;
                if parts.next().is_some() {
                    return Err(XisfError::Format(format!("Trailing location fields: {text}")));
                }
                if position < min_position {
                    return Err(XisfError::Structural(format!(
                        "Attachment offset {position} lies inside the header (end {min_position})"
                    )));
                }
                Ok(Location::Attachment { position, size })
            }
            Some("inline") => {
                let encoding = match parts.next() {
                    Some("base64") => InlineEncoding::Base64,
                    Some("base16") => InlineEncoding::Base16,
                    other => {
                        return Err(XisfError::Format(format!(
                            "Invalid inline encoding: {}",
                            other.unwrap_or("<missing>")
                        )))
                    }
                };
                if parts.next().is_some() {
                    return Err(XisfError::Format(format!("Trailing location fields: {text}")));
                }
                Ok(Location::Inline(encoding))
            }
            Some("embedded") if parts.next().is_none() => Ok(Location::Embedded),
            _ => Err(XisfError::Format(format!("Invalid location: {text}"))),
        }
    }

    /// Serialize back to attribute text.
    pub fn to_attribute(&self) -> String {
        match self {
            Location::Attachment { position, size } => format!("attachment:{position}:{size}"),
            Location::Inline(enc) => format!("inline:{}", enc.name()),
            Location::Embedded => "embedded".to_string(),
        }
    }
}

/// Parse a `<Data>` element's `encoding` attribute.  Absent defaults to
/// base64; `none` is not a valid child-element encoding and is coerced to
/// base64 on read.
pub fn parse_embedded_encoding(text: Option<&str>) -> Result<InlineEncoding> {
    match text {
        None | Some("base64") | Some("none") => Ok(InlineEncoding::Base64),
        Some("base16") => Ok(InlineEncoding::Base16),
        Some(other) => Err(XisfError::Format(format!("Invalid data encoding: {other}"))),
    }
}

fn parse_u64_field(field: Option<&str>, whole: &str, what: &str) -> Result<u64> {
    field
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| XisfError::Format(format!("Invalid {what} in location: {whole}")))
}

// ── Compression ──────────────────────────────────────────────────────────────

/// Parsed form of a compression attribute.
///
/// `item_size` is only meaningful when `shuffled` is set and the size is
/// greater than 1; in every other case serialization omits both the `+sh`
/// suffix and the trailing item-size token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionInfo {
    pub codec: CodecId,
    pub uncompressed_size: usize,
    pub item_size: usize,
    pub shuffled: bool,
}

impl CompressionInfo {
    pub fn new(codec: CodecId, uncompressed_size: usize, item_size: usize, shuffled: bool) -> Self {
        Self { codec, uncompressed_size, item_size, shuffled }
    }

    /// True when the stored bytes were byte-shuffled and need unshuffling
    /// after decompression.
    pub fn needs_unshuffle(&self) -> bool {
        self.shuffled && self.item_size > 1
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = text.split(':');
        let codec_token = parts
            .next()
            .ok_or_else(|| XisfError::Format(format!("Empty compression attribute: {text}")))?;

        let (codec_name, shuffled) = match codec_token.strip_suffix("+sh") {
            Some(name) => (name, true),
            None => (codec_token, false),
        };
        let codec = CodecId::from_name(codec_name)
            .filter(|c| *c != CodecId::None)
            .ok_or_else(|| XisfError::Format(format!("Unknown compression codec: {codec_name}")))?;

        let uncompressed_size = parts
            .next()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| XisfError::Format(format!("Invalid uncompressed size: {text}")))?;

        let item_size = match parts.next() {
            Some(s) => {
                let n = s
                    .parse::<usize>()
                    .map_err(|_| XisfError::Format(format!("Invalid item size: {text}")))?;
                if !(1..=8).contains(&n) {
                    return Err(XisfError::Format(format!("Item size out of range [1,8]: {n}")));
                }
                n
            }
            None => 1,
        };
        if parts.next().is_some() {
            return Err(XisfError::Format(format!("Trailing compression fields: {text}")));
        }

        Ok(Self { codec, uncompressed_size, item_size, shuffled })
    }

    pub fn to_attribute(&self) -> String {
        if self.needs_unshuffle() {
            format!("{}+sh:{}:{}", self.codec.name(), self.uncompressed_size, self.item_size)
        } else {
            format!("{}:{}", self.codec.name(), self.uncompressed_size)
        }
    }
}

// ── Checksum ─────────────────────────────────────────────────────────────────

/// Parsed form of a checksum attribute.  The digest is kept as lowercase hex;
/// comparison against a freshly computed digest is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumInfo {
    pub algorithm: ChecksumAlgorithm,
    pub digest: String,
}

impl ChecksumInfo {
    /// Build from a computed raw digest.
    pub fn from_digest(algorithm: ChecksumAlgorithm, digest: &[u8]) -> Self {
        Self { algorithm, digest: hex::encode(digest) }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let (name, digest) = text
            .split_once(':')
            .ok_or_else(|| XisfError::Format(format!("Invalid checksum attribute: {text}")))?;
        let algorithm = ChecksumAlgorithm::from_name(name)
            .ok_or_else(|| XisfError::Format(format!("Unknown checksum algorithm: {name}")))?;
        if digest.len() != algorithm.digest_len() * 2
            || !digest.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(XisfError::Format(format!(
                "Checksum digest is not {} hex characters: {digest}",
                algorithm.digest_len() * 2
            )));
        }
        Ok(Self { algorithm, digest: digest.to_ascii_lowercase() })
    }

    pub fn to_attribute(&self) -> String {
        format!("{}:{}", self.algorithm.name(), self.digest)
    }

    /// Case-insensitive comparison against a raw computed digest.
    pub fn matches(&self, computed: &[u8]) -> bool {
        self.digest == hex::encode(computed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_roundtrip() {
        let cases = [
            ("attachment:4096:300", Location::Attachment { position: 4096, size: 300 }),
            ("inline:base64", Location::Inline(InlineEncoding::Base64)),
            ("inline:base16", Location::Inline(InlineEncoding::Base16)),
            ("embedded", Location::Embedded),
        ];
        for (text, expected) in cases {
            let parsed = Location::parse(text, 4096).unwrap();
            assert_eq!(parsed, expected);
            assert_eq!(parsed.to_attribute(), text);
        }
    }

    #[test]
    fn location_rejects_offset_below_header_end() {
        let err = Location::parse("attachment:4095:10", 4096).unwrap_err();
        assert!(matches!(err, XisfError::Structural(_)));
        assert!(Location::parse("attachment:4096:10", 4096).is_ok());
    }

    #[test]
    fn location_rejects_garbage() {
        for text in ["inline:none", "inline:hex", "inline:base64:junk", "inline:base16:0",
                     "attachment:12", "attachment:a:b", "embedded:x", "detached:1:2", ""] {
            assert!(Location::parse(text, 0).is_err(), "accepted {text:?}");
        }
    }

    #[test]
    fn embedded_encoding_coerces_none_to_base64() {
        assert_eq!(parse_embedded_encoding(Some("none")).unwrap(), InlineEncoding::Base64);
        assert_eq!(parse_embedded_encoding(None).unwrap(), InlineEncoding::Base64);
        assert_eq!(parse_embedded_encoding(Some("base16")).unwrap(), InlineEncoding::Base16);
        assert!(parse_embedded_encoding(Some("base32")).is_err());
    }

    #[test]
    fn compression_roundtrip() {
        let plain = CompressionInfo::parse("zstd:12345").unwrap();
        assert_eq!(plain.codec, CodecId::Zstd);
        assert_eq!(plain.uncompressed_size, 12345);
        assert!(!plain.shuffled);
        assert_eq!(plain.to_attribute(), "zstd:12345");

        let shuffled = CompressionInfo::parse("lz4hc+sh:12345:2").unwrap();
        assert_eq!(shuffled.codec, CodecId::Lz4Hc);
        assert!(shuffled.needs_unshuffle());
        assert_eq!(shuffled.item_size, 2);
        assert_eq!(shuffled.to_attribute(), "lz4hc+sh:12345:2");
    }

    #[test]
    fn compression_shuffled_item_size_one_serializes_plain() {
        let info = CompressionInfo::new(CodecId::Zlib, 100, 1, true);
        assert_eq!(info.to_attribute(), "zlib:100");
        assert!(!info.needs_unshuffle());
    }

    #[test]
    fn compression_item_size_bounds() {
        assert!(CompressionInfo::parse("zstd+sh:10:0").is_err());
        assert!(CompressionInfo::parse("zstd+sh:10:9").is_err());
        assert!(CompressionInfo::parse("zstd+sh:10:8").is_ok());
    }

    #[test]
    fn compression_rejects_unknown_codec() {
        assert!(CompressionInfo::parse("gzip:10").is_err());
        assert!(CompressionInfo::parse("none:10").is_err());
        assert!(CompressionInfo::parse("zstd").is_err());
    }

    #[test]
    fn checksum_roundtrip_and_case() {
        let digest_hex = "AB".repeat(32);
        let parsed = ChecksumInfo::parse(&format!("SHA-256:{digest_hex}")).unwrap();
        assert_eq!(parsed.algorithm, ChecksumAlgorithm::Sha256);
        assert_eq!(parsed.digest, "ab".repeat(32));
        assert_eq!(parsed.to_attribute(), format!("sha256:{}", "ab".repeat(32)));
    }

    #[test]
    fn checksum_rejects_wrong_digest_length() {
        assert!(ChecksumInfo::parse(&format!("sha256:{}", "ab".repeat(20))).is_err());
        assert!(ChecksumInfo::parse("sha256:nothex").is_err());
        assert!(ChecksumInfo::parse("sha256").is_err());
    }
}
