//! Container reader and writer.
//!
//! # Writer
//! [`XisfWriter`] walks a [`Document`], runs every payload through the
//! output-block pipeline (shuffle, compress, checksum), serializes the XML
//! header with placeholder tokens for attachment offsets, runs the layout
//! stabilization loop, and finally writes the fixed-size header followed by
//! each attachment at its 4096-aligned offset.  Any failure during
//! compression, checksum computation, or stabilization aborts the write; a
//! partially written stream is never valid.
//!
//! # Reader
//! [`XisfReader`] verifies the signature, reads the header markup once, and
//! builds the document graph with lazy [`InputBlock`]s.  Payload bytes stay
//! on the channel until an image or property value is actually requested.
//! Signature/version/root failures are fatal; per-element failures are
//! skipped with a warning unless [`ReadOptions::strict`] promotes them.
//! Checksum mismatches are always fatal regardless of strictness.
//!
//! # Concurrency
//! One reader or writer instance owns one seekable channel and is not safe
//! for concurrent use; scale by opening independent instances.  The `Seek`
//! bound rejects sequential-only channels at compile time.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};

use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt};
use chrono::Utc;
use log::{debug, trace, warn};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::block::{InputBlock, OutputBlock};
use crate::codec::{ChecksumAlgorithm, CodecId};
use crate::document::{
    parse_geometry, ArrayShape, ColorSpace, DeferredArray, Document, ElementFormat, FitsKeyword,
    Image, ImageData, Property, PropertyPayload, PropertyValue, SampleFormat, VectorValue,
};
use crate::error::{Result, XisfError};
use crate::grammar::{
    parse_embedded_encoding, ChecksumInfo, CompressionInfo, InlineEncoding, Location,
};
use crate::layout::{align_block, build_header, AttachmentCatalog, HEADER_PREFIX_LEN, SIGNATURE};
use crate::metadata::{ColorFilterArray, DisplayFunction, Resolution, RgbWorkingSpace};

/// Default Zstd compression level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

const METADATA_NAMESPACE: &str = "XISF:";

// ── Options ──────────────────────────────────────────────────────────────────

/// Configuration for [`XisfWriter`].
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub codec: CodecId,
    pub level: i32,
    /// Byte-shuffle multi-byte payloads before compression.
    pub shuffle: bool,
    pub checksum: Option<ChecksumAlgorithm>,
    /// Recorded as the `XISF:CreatorApplication` metadata property.
    pub creator_application: String,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            codec: CodecId::Zstd,
            level: DEFAULT_COMPRESSION_LEVEL,
            shuffle: true,
            checksum: None,
            creator_application: concat!("xisfio ", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Configuration for [`XisfReader`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Promote per-element parse failures from skip-with-warning to fatal.
    pub strict: bool,
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct XisfWriter<W: Write + Seek> {
    sink: W,
    options: WriteOptions,
}

impl<W: Write + Seek> XisfWriter<W> {
    pub fn new(sink: W) -> Self {
        Self::with_options(sink, WriteOptions::default())
    }

    pub fn with_options(sink: W, options: WriteOptions) -> Self {
        Self { sink, options }
    }

    /// Serialize the whole document and write it out.  Must be called once;
    /// the channel is rewound to position zero first.
    pub fn write_document(&mut self, document: &Document) -> Result<()> {
        let mut catalog = AttachmentCatalog::new();
        let mut xml = String::with_capacity(4096);
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        xml.push_str("<xisf version=\"1.0\" xmlns=\"http://www.pixinsight.com/xisf\">");

        for image in &document.images {
            self.serialize_image(&mut xml, &mut catalog, image, "Image")?;
        }
        for property in document.properties.iter() {
            if !property.id.starts_with(METADATA_NAMESPACE) {
                self.serialize_property(&mut xml, &mut catalog, property)?;
            }
        }
        self.serialize_metadata(&mut xml, &mut catalog, document)?;
        xml.push_str("</xisf>");

        let (markup, aligned) = catalog.stabilize(xml)?;
        debug!(
            "writing header: {} bytes aligned, {} attachments",
            aligned,
            catalog.len()
        );

        self.sink.seek(SeekFrom::Start(0))?;
        self.sink.write_all(&build_header(&markup, aligned))?;

        let mut position = aligned;
        for block in catalog.blocks() {
            if block.position > position {
                self.sink.write_all(&vec![0u8; (block.position - position) as usize])?;
            }
            self.sink.write_all(block.stored())?;
            position = block.position + block.stored_len() as u64;
        }
        self.sink.flush()?;
        Ok(())
    }

    /// Release the underlying channel.
    pub fn into_inner(self) -> W {
        self.sink
    }

    // ── Serialization helpers ────────────────────────────────────────────────

    fn run_pipeline(&self, data: Vec<u8>, item_size: usize) -> Result<OutputBlock> {
        let mut block = OutputBlock::new(data);
        block.compress(self.options.codec, self.options.level, item_size, self.options.shuffle)?;
        if let Some(algorithm) = self.options.checksum {
            block.compute_checksum(algorithm);
        }
        Ok(block)
    }

    fn serialize_image(
        &self,
        xml: &mut String,
        catalog: &mut AttachmentCatalog,
        image: &Image,
        tag: &str,
    ) -> Result<()> {
        let pixels = match &image.data {
            ImageData::Raw(bytes) => bytes.clone(),
            ImageData::Block(_) => {
                return Err(XisfError::Structural(
                    "Image data must be materialized before writing".into(),
                ))
            }
        };
        let block = self.run_pipeline(pixels, image.sample_format.bytes_per_sample())?;

        xml.push('<');
        xml.push_str(tag);
        push_attr(xml, "geometry", &image.geometry_attribute());
        push_attr(xml, "sampleFormat", image.sample_format.name());
        push_attr(xml, "colorSpace", image.color_space.name());
        if let Some(id) = &image.id {
            push_attr(xml, "id", id);
        }
        if let Some(compression) = &block.compression {
            push_attr(xml, "compression", &compression.to_attribute());
        }
        if let Some(checksum) = &block.checksum {
            push_attr(xml, "checksum", &checksum.to_attribute());
        }

        // Pixel payloads are never attribute text: small blocks become an
        // embedded child element, large ones an attachment.
        let embedded_text = if block.is_inlineable() {
            push_attr(xml, "location", &Location::Embedded.to_attribute());
            Some(block.encode_text(InlineEncoding::Base64))
        } else {
            let token = catalog.register(block);
            push_attr(xml, "location", &token);
            None
        };
        xml.push('>');

        if let Some(text) = embedded_text {
            xml.push_str("<Data encoding=\"base64\">");
            xml.push_str(&text);
            xml.push_str("</Data>");
        }

        for keyword in &image.fits_keywords {
            xml.push_str("<FITSKeyword");
            push_attr(xml, "name", &keyword.name);
            push_attr(xml, "value", &keyword.value);
            push_attr(xml, "comment", &keyword.comment);
            xml.push_str("/>");
        }
        for property in image.properties.iter() {
            self.serialize_property(xml, catalog, property)?;
        }
        if let Some(cfa) = &image.cfa {
            push_metadata_element(xml, "ColorFilterArray", &cfa.attributes());
        }
        if let Some(ws) = &image.rgb_working_space {
            push_metadata_element(xml, "RGBWorkingSpace", &ws.attributes());
        }
        if let Some(df) = &image.display_function {
            push_metadata_element(xml, "DisplayFunction", &df.attributes());
        }
        if let Some(res) = &image.resolution {
            push_metadata_element(xml, "Resolution", &res.attributes());
        }
        if let Some(thumbnail) = &image.thumbnail {
            self.serialize_image(xml, catalog, thumbnail, "Thumbnail")?;
        }

        xml.push_str("</");
        xml.push_str(tag);
        xml.push('>');
        Ok(())
    }

    fn serialize_property(
        &self,
        xml: &mut String,
        catalog: &mut AttachmentCatalog,
        property: &Property,
    ) -> Result<()> {
        let value = match &property.payload {
            PropertyPayload::Value(v) => v,
            PropertyPayload::Deferred(_) => {
                return Err(XisfError::Structural(format!(
                    "Property '{}' must be materialized before writing",
                    property.id
                )))
            }
        };

        xml.push_str("<Property");
        push_attr(xml, "id", &property.id);
        push_attr(xml, "type", &value.type_name());
        if let Some(comment) = &property.comment {
            push_attr(xml, "comment", comment);
        }

        match value {
            PropertyValue::String(text) => {
                xml.push('>');
                xml.push_str(&escape(text));
                xml.push_str("</Property>");
            }
            PropertyValue::Vector(elements) => {
                let length = elements.len();
                push_attr(xml, "length", &length.to_string());
                self.serialize_array(xml, catalog, elements)?;
            }
            PropertyValue::Matrix { rows, cols, elements } => {
                if rows.checked_mul(*cols) != Some(elements.len()) {
                    return Err(XisfError::Structural(format!(
                        "Matrix '{}' holds {} elements, declared {rows}x{cols}",
                        property.id,
                        elements.len()
                    )));
                }
                push_attr(xml, "rows", &rows.to_string());
                push_attr(xml, "columns", &cols.to_string());
                self.serialize_array(xml, catalog, elements)?;
            }
            scalar => {
                // Scalars, booleans and time points always fit an attribute.
                let text = scalar.to_value_text().ok_or_else(|| {
                    XisfError::Structural(format!("Property '{}' has no inline form", property.id))
                })?;
                push_attr(xml, "value", &text);
                xml.push_str("/>");
            }
        }
        Ok(())
    }

    /// Shared tail for vector/matrix properties: run the pipeline, then
    /// either inline the encoded bytes as element content or register an
    /// attachment.
    fn serialize_array(
        &self,
        xml: &mut String,
        catalog: &mut AttachmentCatalog,
        elements: &VectorValue,
    ) -> Result<()> {
        let block = self.run_pipeline(elements.to_le_bytes(), elements.format().byte_width())?;
        if let Some(compression) = &block.compression {
            push_attr(xml, "compression", &compression.to_attribute());
        }
        if let Some(checksum) = &block.checksum {
            push_attr(xml, "checksum", &checksum.to_attribute());
        }
        if block.is_inlineable() {
            push_attr(xml, "location", &Location::Inline(InlineEncoding::Base64).to_attribute());
            xml.push('>');
            xml.push_str(&block.encode_text(InlineEncoding::Base64));
            xml.push_str("</Property>");
        } else {
            let token = catalog.register(block);
            push_attr(xml, "location", &token);
            xml.push_str("/>");
        }
        Ok(())
    }

    fn serialize_metadata(
        &self,
        xml: &mut String,
        catalog: &mut AttachmentCatalog,
        document: &Document,
    ) -> Result<()> {
        xml.push_str("<Metadata>");
        if !document.properties.contains("XISF:CreationTime") {
            xml.push_str("<Property id=\"XISF:CreationTime\" type=\"TimePoint\"");
            push_attr(xml, "value", &Utc::now().to_rfc3339());
            xml.push_str("/>");
        }
        if !document.properties.contains("XISF:CreatorApplication") {
            xml.push_str("<Property id=\"XISF:CreatorApplication\" type=\"String\">");
            xml.push_str(&escape(&self.options.creator_application));
            xml.push_str("</Property>");
        }
        for property in document.properties.iter() {
            if property.id.starts_with(METADATA_NAMESPACE) {
                self.serialize_property(xml, catalog, property)?;
            }
        }
        xml.push_str("</Metadata>");
        Ok(())
    }
}

fn push_attr(xml: &mut String, name: &str, value: &str) {
    xml.push(' ');
    xml.push_str(name);
    xml.push_str("=\"");
    xml.push_str(&escape(value));
    xml.push('"');
}

fn push_metadata_element(xml: &mut String, tag: &str, attrs: &[(&'static str, String)]) {
    xml.push('<');
    xml.push_str(tag);
    for (name, value) in attrs {
        push_attr(xml, name, value);
    }
    xml.push_str("/>");
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct XisfReader<R: Read + Seek> {
    source: R,
    pub document: Document,
}

impl<R: Read + Seek> XisfReader<R> {
    pub fn open(source: R) -> Result<Self> {
        Self::with_options(source, ReadOptions::default())
    }

    /// Read and parse the header.  The header is consumed exactly once; all
    /// payload data stays on the channel until requested.
    pub fn with_options(mut source: R, options: ReadOptions) -> Result<Self> {
        source.seek(SeekFrom::Start(0))?;
        let mut signature = [0u8; 8];
        source.read_exact(&mut signature).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => XisfError::Signature,
            _ => XisfError::Io(e),
        })?;
        if &signature != SIGNATURE {
            return Err(XisfError::Signature);
        }

        let header_len = source.read_u32::<LittleEndian>()?;
        let mut reserved = [0u8; 4];
        source.read_exact(&mut reserved)?;

        let mut xml = vec![0u8; header_len as usize];
        source.read_exact(&mut xml)?;
        let xml = String::from_utf8(xml)
            .map_err(|_| XisfError::Structural("Header markup is not valid UTF-8".into()))?;

        // Every attachment must start at or after the padded header end.
        let min_position = align_block((HEADER_PREFIX_LEN as u64) + u64::from(header_len));
        trace!("header: {header_len} markup bytes, attachments start at {min_position}");

        let root = parse_tree(&xml)?;
        let document = interpret_root(&root, min_position, &options)?;
        Ok(Self { source, document })
    }

    /// Logical pixel payload of an image, loading (and verifying) its block
    /// on first use.
    pub fn image_data(&mut self, index: usize) -> Result<Vec<u8>> {
        let Self { source, document } = self;
        let image = document
            .images
            .get_mut(index)
            .ok_or_else(|| XisfError::Structural(format!("No image at index {index}")))?;
        load_image_data(source, image)
    }

    /// Pixel payload of an image's thumbnail.
    pub fn thumbnail_data(&mut self, index: usize) -> Result<Vec<u8>> {
        let Self { source, document } = self;
        let image = document
            .images
            .get_mut(index)
            .ok_or_else(|| XisfError::Structural(format!("No image at index {index}")))?;
        let thumbnail = image
            .thumbnail
            .as_deref_mut()
            .ok_or_else(|| XisfError::Structural(format!("Image {index} has no thumbnail")))?;
        load_image_data(source, thumbnail)
    }

    /// Materialize a document-level property value.
    pub fn property_value(&mut self, id: &str) -> Result<PropertyValue> {
        let Self { source, document } = self;
        let property = document
            .properties
            .get_mut(id)
            .ok_or_else(|| XisfError::Structural(format!("No property '{id}'")))?;
        resolve_property(source, property)
    }

    /// Materialize a property attached to an image.
    pub fn image_property_value(&mut self, index: usize, id: &str) -> Result<PropertyValue> {
        let Self { source, document } = self;
        let image = document
            .images
            .get_mut(index)
            .ok_or_else(|| XisfError::Structural(format!("No image at index {index}")))?;
        let property = image
            .properties
            .get_mut(id)
            .ok_or_else(|| XisfError::Structural(format!("No property '{id}'")))?;
        resolve_property(source, property)
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}

fn load_image_data<R: Read + Seek>(source: &mut R, image: &mut Image) -> Result<Vec<u8>> {
    match &mut image.data {
        ImageData::Raw(bytes) => Ok(bytes.clone()),
        ImageData::Block(block) => Ok(block.load(source)?.to_vec()),
    }
}

fn resolve_property<R: Read + Seek>(source: &mut R, property: &mut Property) -> Result<PropertyValue> {
    match &mut property.payload {
        PropertyPayload::Value(value) => Ok(value.clone()),
        PropertyPayload::Deferred(array) => {
            let bytes = array.block.load(source)?;
            let elements = VectorValue::from_le_bytes(array.format, bytes)?;
            let declared = array.shape.element_count().ok_or_else(|| {
                XisfError::Structural(format!("Property '{}' shape overflows", property.id))
            })?;
            if elements.len() != declared {
                return Err(XisfError::Structural(format!(
                    "Property '{}' holds {} elements, declared {declared}",
                    property.id,
                    elements.len()
                )));
            }
            Ok(match array.shape {
                ArrayShape::Vector { .. } => PropertyValue::Vector(elements),
                ArrayShape::Matrix { rows, cols } => {
                    PropertyValue::Matrix { rows, cols, elements }
                }
            })
        }
    }
}

// ── Markup tree ──────────────────────────────────────────────────────────────

/// Minimal element tree.  The header is bounded in size, so building the
/// tree up front keeps the lenient/strict recovery logic trivial: each
/// element is interpreted as a unit after the XML itself parsed cleanly.
#[derive(Debug, Default)]
struct XmlElement {
    name: String,
    attrs: HashMap<String, String>,
    text: String,
    children: Vec<XmlElement>,
}

impl XmlElement {
    fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    fn require_attr(&self, name: &str) -> Result<&str> {
        self.attr(name).ok_or_else(|| {
            XisfError::Structural(format!("<{}> is missing required '{name}'", self.name))
        })
    }
}

fn element_from(start: &BytesStart) -> Result<XmlElement> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attrs = HashMap::new();
    for attr in start.attributes() {
        let attr =
            attr.map_err(|e| XisfError::Format(format!("Bad attribute in <{name}>: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| XisfError::Format(format!("Bad attribute value in <{name}>: {e}")))?
            .into_owned();
        attrs.insert(key, value);
    }
    Ok(XmlElement { name, attrs, ..Default::default() })
}

fn parse_tree(xml: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => stack.push(element_from(&e)?),
            Event::Empty(e) => {
                let element = element_from(&e)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| XisfError::Structural("Unbalanced element nesting".into()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| XisfError::Format(format!("Bad text content: {e}")))?;
                    top.text.push_str(&text);
                }
            }
            Event::CData(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(XisfError::Structural("Header markup ended inside an element".into()));
    }
    root.ok_or_else(|| XisfError::Structural("Header has no root element".into()))
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        Ok(())
    } else if root.is_none() {
        *root = Some(element);
        Ok(())
    } else {
        Err(XisfError::Structural("Header has more than one root element".into()))
    }
}

// ── Header interpretation ────────────────────────────────────────────────────

/// Apply the recovery policy to a per-element outcome.
fn recover(result: Result<()>, element: &str, options: &ReadOptions) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if options.strict => Err(e),
        Err(e) => {
            warn!("skipping <{element}>: {e}");
            Ok(())
        }
    }
}

fn interpret_root(root: &XmlElement, min_position: u64, options: &ReadOptions) -> Result<Document> {
    if root.name != "xisf" {
        return Err(XisfError::Structural(format!("Unexpected root element <{}>", root.name)));
    }
    let version = root.require_attr("version")?;
    if version != "1.0" {
        return Err(XisfError::Version(version.to_string()));
    }

    let mut document = Document::new();
    for child in &root.children {
        let outcome = match child.name.as_str() {
            "Image" => interpret_image(child, min_position, options)
                .map(|image| document.images.push(image)),
            "Property" => interpret_property(child, min_position)
                .and_then(|p| document.properties.insert(p)),
            "Metadata" => {
                for entry in &child.children {
                    let outcome = interpret_property(entry, min_position)
                        .and_then(|p| document.properties.insert(p));
                    recover(outcome, &entry.name, options)?;
                }
                Ok(())
            }
            other => {
                trace!("ignoring element <{other}>");
                Ok(())
            }
        };
        recover(outcome, &child.name, options)?;
    }
    Ok(document)
}

fn interpret_image(
    element: &XmlElement,
    min_position: u64,
    options: &ReadOptions,
) -> Result<Image> {
    let (geometry, channel_count) = parse_geometry(element.require_attr("geometry")?)?;
    let sample_format = SampleFormat::from_name(element.require_attr("sampleFormat")?)
        .ok_or_else(|| XisfError::Structural("Unknown sampleFormat".into()))?;
    let color_space = match element.attr("colorSpace") {
        Some(name) => ColorSpace::from_name(name)
            .ok_or_else(|| XisfError::Structural(format!("Unknown colorSpace: {name}")))?,
        None => ColorSpace::default(),
    };

    let location = Location::parse(element.require_attr("location")?, min_position)?;
    let compression = element.attr("compression").map(CompressionInfo::parse).transpose()?;
    let checksum = element.attr("checksum").map(ChecksumInfo::parse).transpose()?;

    let block = match location {
        Location::Attachment { .. } => InputBlock::attached(location, compression, checksum),
        Location::Embedded => {
            let data = element
                .child("Data")
                .ok_or_else(|| XisfError::Structural("Embedded image has no <Data>".into()))?;
            let encoding = parse_embedded_encoding(data.attr("encoding"))?;
            let stored = decode_inline_text(&data.text, encoding)?;
            InputBlock::resident(location, stored, compression, checksum)
        }
        Location::Inline(_) => {
            return Err(XisfError::Structural(
                "Image pixel data cannot use an inline location".into(),
            ))
        }
    };

    let mut image = Image {
        id: element.attr("id").map(str::to_string),
        geometry,
        channel_count,
        sample_format,
        color_space,
        data: ImageData::Block(block),
        thumbnail: None,
        properties: Default::default(),
        fits_keywords: Vec::new(),
        cfa: None,
        rgb_working_space: None,
        display_function: None,
        resolution: None,
    };

    let expected = image.expected_data_len().ok_or_else(|| {
        XisfError::Structural(format!(
            "Geometry overflows the address space: {}",
            image.geometry_attribute()
        ))
    })?;
    if let ImageData::Block(block) = &image.data {
        if block.logical_len() != expected {
            return Err(XisfError::Structural(format!(
                "Pixel payload is {} bytes, geometry requires {expected}",
                block.logical_len()
            )));
        }
    }

    for child in &element.children {
        let outcome = match child.name.as_str() {
            "Data" => Ok(()), // consumed above
            "Property" => interpret_property(child, min_position)
                .and_then(|p| image.properties.insert(p)),
            "FITSKeyword" => interpret_fits_keyword(child)
                .map(|k| image.fits_keywords.push(k)),
            "Thumbnail" => interpret_image(child, min_position, options)
                .map(|t| image.thumbnail = Some(Box::new(t))),
            "ColorFilterArray" => {
                ColorFilterArray::from_attributes(&child.attrs).map(|v| image.cfa = Some(v))
            }
            "RGBWorkingSpace" => RgbWorkingSpace::from_attributes(&child.attrs)
                .map(|v| image.rgb_working_space = Some(v)),
            "DisplayFunction" => DisplayFunction::from_attributes(&child.attrs)
                .map(|v| image.display_function = Some(v)),
            "Resolution" => {
                Resolution::from_attributes(&child.attrs).map(|v| image.resolution = Some(v))
            }
            other => {
                trace!("ignoring element <{other}>");
                Ok(())
            }
        };
        recover(outcome, &child.name, options)?;
    }
    Ok(image)
}

fn interpret_fits_keyword(element: &XmlElement) -> Result<FitsKeyword> {
    FitsKeyword::new(
        element.require_attr("name")?,
        element.attr("value").unwrap_or_default(),
        element.attr("comment").unwrap_or_default(),
    )
}

fn interpret_property(element: &XmlElement, min_position: u64) -> Result<Property> {
    if element.name != "Property" {
        return Err(XisfError::Structural(format!(
            "Expected <Property>, found <{}>",
            element.name
        )));
    }
    let id = element.require_attr("id")?;
    let type_name = element.require_attr("type")?;

    let mut property = if let Some((format, is_matrix)) = ElementFormat::from_type_name(type_name) {
        let shape = if is_matrix {
            let rows = parse_count(element, "rows")?;
            let cols = parse_count(element, "columns")?;
            ArrayShape::Matrix { rows, cols }
        } else {
            ArrayShape::Vector { length: parse_count(element, "length")? }
        };

        let location = Location::parse(element.require_attr("location")?, min_position)?;
        let compression = element.attr("compression").map(CompressionInfo::parse).transpose()?;
        let checksum = element.attr("checksum").map(ChecksumInfo::parse).transpose()?;

        let block = match location {
            Location::Attachment { .. } => InputBlock::attached(location, compression, checksum),
            Location::Inline(encoding) => {
                let stored = decode_inline_text(&element.text, encoding)?;
                InputBlock::resident(location, stored, compression, checksum)
            }
            Location::Embedded => {
                let data = element.child("Data").ok_or_else(|| {
                    XisfError::Structural(format!("Embedded property '{id}' has no <Data>"))
                })?;
                let encoding = parse_embedded_encoding(data.attr("encoding"))?;
                let stored = decode_inline_text(&data.text, encoding)?;
                InputBlock::resident(location, stored, compression, checksum)
            }
        };

        // Element count is validated against the declared shape up front,
        // before anyone pays for a data load.
        let expected = shape
            .element_count()
            .and_then(|count| count.checked_mul(format.byte_width()))
            .ok_or_else(|| {
                XisfError::Structural(format!("Property '{id}' shape overflows the address space"))
            })?;
        if block.logical_len() != expected {
            return Err(XisfError::Structural(format!(
                "Property '{id}' payload is {} bytes, shape requires {expected}",
                block.logical_len()
            )));
        }
        Property::deferred(id, DeferredArray { shape, format, block })?
    } else if type_name == "String" {
        let text = match element.attr("value") {
            Some(v) => v.to_string(),
            None => element.text.clone(),
        };
        Property::new(id, PropertyValue::String(text))?
    } else {
        let value = PropertyValue::parse_scalar(type_name, element.require_attr("value")?)?;
        Property::new(id, value)?
    };

    property.comment = element.attr("comment").map(str::to_string);
    Ok(property)
}

fn parse_count(element: &XmlElement, attr: &str) -> Result<usize> {
    element
        .require_attr(attr)?
        .parse::<usize>()
        .map_err(|_| XisfError::Structural(format!("Invalid '{attr}' in <{}>", element.name)))
}

fn decode_inline_text(text: &str, encoding: InlineEncoding) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    match encoding {
        InlineEncoding::Base64 => base64::engine::general_purpose::STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| XisfError::Format(format!("Invalid base64 data: {e}"))),
        InlineEncoding::Base16 => {
            hex::decode(compact).map_err(|e| XisfError::Format(format!("Invalid base16 data: {e}")))
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
