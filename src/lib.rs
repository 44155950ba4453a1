pub mod error;
pub mod codec;
pub mod grammar;
pub mod block;
pub mod layout;
pub mod document;
pub mod metadata;
pub mod io_stream;

pub use error::{Result, XisfError};
pub use codec::{ChecksumAlgorithm, CodecId};
pub use document::{Document, Image, Property, PropertyValue, SampleFormat};
pub use io_stream::{ReadOptions, WriteOptions, XisfReader, XisfWriter};
