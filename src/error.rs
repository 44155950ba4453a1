//! Crate-wide error type.
//!
//! The variants mirror how failures surface to callers: signature/version
//! problems mean "not a readable container", structural and format errors
//! mean "a container, but broken", and checksum mismatches are always fatal.

use thiserror::Error;

use crate::codec::CodecError;

#[derive(Debug, Error)]
pub enum XisfError {
    #[error("Not an XISF container: bad signature")]
    Signature,

    #[error("Unsupported format version: {0}")]
    Version(String),

    /// A well-formed header describing an impossible container.
    #[error("Structural error: {0}")]
    Structural(String),

    /// Malformed attribute text or encoded data.
    #[error("Format error: {0}")]
    Format(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Checksum mismatch: expected {expected}, computed {computed}")]
    Checksum { expected: String, computed: String },

    /// Header layout failed to reach a fixed point.
    #[error("Layout error: {0}")]
    Layout(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, XisfError>;
