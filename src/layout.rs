//! Header layout engine: alignment, the attachment catalog, and the offset
//! stabilization loop.
//!
//! Attachment offsets are printed as decimal text inside the header, but the
//! header's own aligned byte length determines where the first attachment
//! begins — a circular dependency.  The loop below serializes the header
//! once with placeholder tokens, then repeatedly recomputes the aligned
//! header size and rewrites every placeholder to its candidate offset until
//! the aligned size stops changing.  Offsets only grow as the header grows,
//! so the fixed point is normally reached in two or three passes; the pass
//! bound turns a pathological oscillation into an error instead of a hang.

use log::debug;

use crate::block::OutputBlock;
use crate::error::{Result, XisfError};

/// 8-byte ASCII file signature.
pub const SIGNATURE: &[u8; 8] = b"XISF0100";

/// Signature plus the 8-byte length field (4 bytes LE length, 4 reserved).
pub const HEADER_PREFIX_LEN: usize = 16;

/// Attachments start at multiples of this; the header is padded to it.
pub const BLOCK_ALIGNMENT: u64 = 4096;

/// Stabilization gives up after this many passes.
const MAX_STABILIZATION_PASSES: usize = 10;

/// Round `n` up to the next multiple of [`BLOCK_ALIGNMENT`].
pub fn align_block(n: u64) -> u64 {
    n.div_ceil(BLOCK_ALIGNMENT) * BLOCK_ALIGNMENT
}

/// Replace every occurrence of a placeholder token in the serialized header.
///
/// Kept behind this narrow seam so a structured markup-tree edit could be
/// swapped in without touching the stabilization loop.
fn rewrite_token(text: &str, old: &str, new: &str) -> String {
    text.replace(old, new)
}

/// Ordered list of write-side blocks awaiting final offsets.
#[derive(Debug, Default)]
pub struct AttachmentCatalog {
    blocks: Vec<OutputBlock>,
}

impl AttachmentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Register a block and return the placeholder location text to embed in
    /// the markup.  The token carries the (already final) stored size; only
    /// the offset field is rewritten during stabilization.
    pub fn register(&mut self, mut block: OutputBlock) -> String {
        let token = format!("attachment:*{:08x}:{}", self.blocks.len(), block.stored_len());
        block.placeholder = token.clone();
        self.blocks.push(block);
        token
    }

    /// Run the stabilization loop over `markup`.
    ///
    /// On success returns the final markup text and the aligned header size;
    /// every cataloged block then carries its final byte offset.
    pub fn stabilize(&mut self, markup: String) -> Result<(String, u64)> {
        let mut markup = markup;
        let mut previous: Option<u64> = None;

        for pass in 0..MAX_STABILIZATION_PASSES {
            let aligned = align_block((HEADER_PREFIX_LEN + markup.len()) as u64);
            if previous == Some(aligned) {
                debug!("header layout stabilized after {pass} passes at {aligned} bytes");
                return Ok((markup, aligned));
            }

            let mut offset = aligned;
            for block in &mut self.blocks {
                let size = block.stored_len() as u64;
                let next = format!("attachment:{offset}:{size}");
                markup = rewrite_token(&markup, &block.placeholder, &next);
                block.placeholder = next;
                block.position = offset;
                offset = align_block(offset + size);
            }
            previous = Some(aligned);
        }

        Err(XisfError::Layout(format!(
            "no fixed point after {MAX_STABILIZATION_PASSES} passes ({} attachments)",
            self.blocks.len()
        )))
    }

    /// Blocks in catalog order, for writing after the header.
    pub fn blocks(&self) -> &[OutputBlock] {
        &self.blocks
    }
}

/// Assemble the fixed-size header buffer: signature, little-endian length
/// field, markup bytes, zero padding up to `aligned`.
pub fn build_header(markup: &str, aligned: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(aligned as usize);
    buf.extend_from_slice(SIGNATURE);
    buf.extend_from_slice(&(markup.len() as u32).to_le_bytes());
    buf.extend_from_slice(&[0u8; 4]);
    buf.extend_from_slice(markup.as_bytes());
    buf.resize(aligned as usize, 0);
    buf
}

// ── Tests ────────────────────────────────────────────────────────────────────
