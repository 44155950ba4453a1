//! In-memory document model: images, properties, and FITS keywords.
//!
//! The model is deliberately dumb about storage — every payload larger than
//! a scalar is represented either as raw logical bytes (write side) or as a
//! lazily loaded [`InputBlock`] (read side).  Property kinds form a closed
//! tagged enum so that adding a numeric width is a compile-time-checked
//! change, and encode/decode happens through exhaustive matches.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};

use crate::block::InputBlock;
use crate::error::{Result, XisfError};
use crate::metadata::{ColorFilterArray, DisplayFunction, Resolution, RgbWorkingSpace};

// ── Sample formats ───────────────────────────────────────────────────────────

/// Pixel sample format.  The byte width doubles as the shuffle item size for
/// pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl SampleFormat {
    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::UInt8   => "UInt8",
            SampleFormat::UInt16  => "UInt16",
            SampleFormat::UInt32  => "UInt32",
            SampleFormat::UInt64  => "UInt64",
            SampleFormat::Float32 => "Float32",
            SampleFormat::Float64 => "Float64",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "UInt8"   => Some(SampleFormat::UInt8),
            "UInt16"  => Some(SampleFormat::UInt16),
            "UInt32"  => Some(SampleFormat::UInt32),
            "UInt64"  => Some(SampleFormat::UInt64),
            "Float32" => Some(SampleFormat::Float32),
            "Float64" => Some(SampleFormat::Float64),
            _         => None,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::UInt8 => 1,
            SampleFormat::UInt16 => 2,
            SampleFormat::UInt32 | SampleFormat::Float32 => 4,
            SampleFormat::UInt64 | SampleFormat::Float64 => 8,
        }
    }
}

/// Color space of an image's channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    #[default]
    Gray,
    Rgb,
    CieLab,
}

impl ColorSpace {
    pub fn name(self) -> &'static str {
        match self {
            ColorSpace::Gray   => "Gray",
            ColorSpace::Rgb    => "RGB",
            ColorSpace::CieLab => "CIELab",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "Gray"   => Some(ColorSpace::Gray),
            "RGB"    => Some(ColorSpace::Rgb),
            "CIELab" => Some(ColorSpace::CieLab),
            _        => None,
        }
    }
}

// ── Vector / matrix element formats ──────────────────────────────────────────

/// Element width tag for vector and matrix properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementFormat {
    I8,
    UI8,
    I16,
    UI16,
    I32,
    UI32,
    I64,
    UI64,
    F32,
    F64,
}

impl ElementFormat {
    pub fn byte_width(self) -> usize {
        match self {
            ElementFormat::I8 | ElementFormat::UI8 => 1,
            ElementFormat::I16 | ElementFormat::UI16 => 2,
            ElementFormat::I32 | ElementFormat::UI32 | ElementFormat::F32 => 4,
            ElementFormat::I64 | ElementFormat::UI64 | ElementFormat::F64 => 8,
        }
    }

    fn stem(self) -> &'static str {
        match self {
            ElementFormat::I8  => "I8",
            ElementFormat::UI8 => "UI8",
            ElementFormat::I16 => "I16",
            ElementFormat::UI16 => "UI16",
            ElementFormat::I32 => "I32",
            ElementFormat::UI32 => "UI32",
            ElementFormat::I64 => "I64",
            ElementFormat::UI64 => "UI64",
            ElementFormat::F32 => "F32",
            ElementFormat::F64 => "F64",
        }
    }

    fn from_stem(s: &str) -> Option<Self> {
        match s {
            "I8"   => Some(ElementFormat::I8),
            "UI8"  => Some(ElementFormat::UI8),
            "I16"  => Some(ElementFormat::I16),
            "UI16" => Some(ElementFormat::UI16),
            "I32"  => Some(ElementFormat::I32),
            "UI32" => Some(ElementFormat::UI32),
            "I64"  => Some(ElementFormat::I64),
            "UI64" => Some(ElementFormat::UI64),
            "F32"  => Some(ElementFormat::F32),
            "F64"  => Some(ElementFormat::F64),
            _      => None,
        }
    }

    pub fn vector_type_name(self) -> String {
        format!("{}Vector", self.stem())
    }

    pub fn matrix_type_name(self) -> String {
        format!("{}Matrix", self.stem())
    }

    /// Resolve a property type name like `F64Vector` or `I16Matrix`.
    /// Returns the element format and whether it names a matrix.
    pub fn from_type_name(name: &str) -> Option<(Self, bool)> {
        if let Some(stem) = name.strip_suffix("Vector") {
            return Self::from_stem(stem).map(|f| (f, false));
        }
        if let Some(stem) = name.strip_suffix("Matrix") {
            return Self::from_stem(stem).map(|f| (f, true));
        }
        None
    }
}

/// Typed element storage for vector and matrix properties, one case per
/// element width.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorValue {
    I8(Vec<i8>),
    UI8(Vec<u8>),
    I16(Vec<i16>),
    UI16(Vec<u16>),
    I32(Vec<i32>),
    UI32(Vec<u32>),
    I64(Vec<i64>),
    UI64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl VectorValue {
    pub fn len(&self) -> usize {
        match self {
            VectorValue::I8(v) => v.len(),
            VectorValue::UI8(v) => v.len(),
            VectorValue::I16(v) => v.len(),
            VectorValue::UI16(v) => v.len(),
            VectorValue::I32(v) => v.len(),
            VectorValue::UI32(v) => v.len(),
            VectorValue::I64(v) => v.len(),
            VectorValue::UI64(v) => v.len(),
            VectorValue::F32(v) => v.len(),
            VectorValue::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn format(&self) -> ElementFormat {
        match self {
            VectorValue::I8(_) => ElementFormat::I8,
            VectorValue::UI8(_) => ElementFormat::UI8,
            VectorValue::I16(_) => ElementFormat::I16,
            VectorValue::UI16(_) => ElementFormat::UI16,
            VectorValue::I32(_) => ElementFormat::I32,
            VectorValue::UI32(_) => ElementFormat::UI32,
            VectorValue::I64(_) => ElementFormat::I64,
            VectorValue::UI64(_) => ElementFormat::UI64,
            VectorValue::F32(_) => ElementFormat::F32,
            VectorValue::F64(_) => ElementFormat::F64,
        }
    }

    /// Serialize elements as little-endian bytes (the on-disk order).
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            VectorValue::I8(v) => v.iter().map(|&x| x as u8).collect(),
            VectorValue::UI8(v) => v.clone(),
            VectorValue::I16(v) => {
                let mut out = vec![0u8; v.len() * 2];
                LittleEndian::write_i16_into(v, &mut out);
                out
            }
            VectorValue::UI16(v) => {
                let mut out = vec![0u8; v.len() * 2];
                LittleEndian::write_u16_into(v, &mut out);
                out
            }
            VectorValue::I32(v) => {
                let mut out = vec![0u8; v.len() * 4];
                LittleEndian::write_i32_into(v, &mut out);
                out
            }
            VectorValue::UI32(v) => {
                let mut out = vec![0u8; v.len() * 4];
                LittleEndian::write_u32_into(v, &mut out);
                out
            }
            VectorValue::I64(v) => {
                let mut out = vec![0u8; v.len() * 8];
                LittleEndian::write_i64_into(v, &mut out);
                out
            }
            VectorValue::UI64(v) => {
                let mut out = vec![0u8; v.len() * 8];
                LittleEndian::write_u64_into(v, &mut out);
                out
            }
            VectorValue::F32(v) => {
                let mut out = vec![0u8; v.len() * 4];
                LittleEndian::write_f32_into(v, &mut out);
                out
            }
            VectorValue::F64(v) => {
                let mut out = vec![0u8; v.len() * 8];
                LittleEndian::write_f64_into(v, &mut out);
                out
            }
        }
    }

    /// Decode little-endian bytes into typed elements.
    pub fn from_le_bytes(format: ElementFormat, bytes: &[u8]) -> Result<Self> {
        let width = format.byte_width();
        if bytes.len() % width != 0 {
            return Err(XisfError::Structural(format!(
                "Payload length {} is not a multiple of the {width}-byte element width",
                bytes.len()
            )));
        }
        let n = bytes.len() / width;
        Ok(match format {
            ElementFormat::I8 => VectorValue::I8(bytes.iter().map(|&b| b as i8).collect()),
            ElementFormat::UI8 => VectorValue::UI8(bytes.to_vec()),
            ElementFormat::I16 => {
                let mut out = vec![0i16; n];
                LittleEndian::read_i16_into(bytes, &mut out);
                VectorValue::I16(out)
            }
            ElementFormat::UI16 => {
                let mut out = vec![0u16; n];
                LittleEndian::read_u16_into(bytes, &mut out);
                VectorValue::UI16(out)
            }
            ElementFormat::I32 => {
                let mut out = vec![0i32; n];
                LittleEndian::read_i32_into(bytes, &mut out);
                VectorValue::I32(out)
            }
            ElementFormat::UI32 => {
                let mut out = vec![0u32; n];
                LittleEndian::read_u32_into(bytes, &mut out);
                VectorValue::UI32(out)
            }
            ElementFormat::I64 => {
                let mut out = vec![0i64; n];
                LittleEndian::read_i64_into(bytes, &mut out);
                VectorValue::I64(out)
            }
            ElementFormat::UI64 => {
                let mut out = vec![0u64; n];
                LittleEndian::read_u64_into(bytes, &mut out);
                VectorValue::UI64(out)
            }
            ElementFormat::F32 => {
                let mut out = vec![0f32; n];
                LittleEndian::read_f32_into(bytes, &mut out);
                VectorValue::F32(out)
            }
            ElementFormat::F64 => {
                let mut out = vec![0f64; n];
                LittleEndian::read_f64_into(bytes, &mut out);
                VectorValue::F64(out)
            }
        })
    }
}

// ── Property values ──────────────────────────────────────────────────────────

/// A property's typed value.  Scalars, strings, and time points serialize
/// inline in the markup; vectors and matrices are backed by data blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Boolean(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    TimePoint(DateTime<Utc>),
    Vector(VectorValue),
    Matrix { rows: usize, cols: usize, elements: VectorValue },
}

impl PropertyValue {
    /// The `type` attribute token for this value.
    pub fn type_name(&self) -> String {
        match self {
            PropertyValue::Boolean(_) => "Boolean".to_string(),
            PropertyValue::Int8(_) => "Int8".to_string(),
            PropertyValue::UInt8(_) => "UInt8".to_string(),
            PropertyValue::Int16(_) => "Int16".to_string(),
            PropertyValue::UInt16(_) => "UInt16".to_string(),
            PropertyValue::Int32(_) => "Int32".to_string(),
            PropertyValue::UInt32(_) => "UInt32".to_string(),
            PropertyValue::Int64(_) => "Int64".to_string(),
            PropertyValue::UInt64(_) => "UInt64".to_string(),
            PropertyValue::Float32(_) => "Float32".to_string(),
            PropertyValue::Float64(_) => "Float64".to_string(),
            PropertyValue::String(_) => "String".to_string(),
            PropertyValue::TimePoint(_) => "TimePoint".to_string(),
            PropertyValue::Vector(v) => v.format().vector_type_name(),
            PropertyValue::Matrix { elements, .. } => elements.format().matrix_type_name(),
        }
    }

    /// True for values backed by a data block rather than attribute text.
    pub fn is_block_backed(&self) -> bool {
        matches!(self, PropertyValue::Vector(_) | PropertyValue::Matrix { .. })
    }

    /// Inline `value` attribute text for scalar-like values; `None` for
    /// strings (element content) and block-backed values.
    pub fn to_value_text(&self) -> Option<String> {
        match self {
            PropertyValue::Boolean(b) => Some(if *b { "1" } else { "0" }.to_string()),
            PropertyValue::Int8(v) => Some(v.to_string()),
            PropertyValue::UInt8(v) => Some(v.to_string()),
            PropertyValue::Int16(v) => Some(v.to_string()),
            PropertyValue::UInt16(v) => Some(v.to_string()),
            PropertyValue::Int32(v) => Some(v.to_string()),
            PropertyValue::UInt32(v) => Some(v.to_string()),
            PropertyValue::Int64(v) => Some(v.to_string()),
            PropertyValue::UInt64(v) => Some(v.to_string()),
            PropertyValue::Float32(v) => Some(v.to_string()),
            PropertyValue::Float64(v) => Some(v.to_string()),
            PropertyValue::TimePoint(t) => Some(t.to_rfc3339()),
            PropertyValue::String(_)
            | PropertyValue::Vector(_)
            | PropertyValue::Matrix { .. } => None,
        }
    }

    /// Parse a scalar-like value from its `type` token and attribute text.
    pub fn parse_scalar(type_name: &str, text: &str) -> Result<Self> {
        fn bad(type_name: &str, text: &str) -> XisfError {
            XisfError::Format(format!("Invalid {type_name} value: {text}"))
        }
        match type_name {
            "Boolean" => match text {
                "0" | "false" => Ok(PropertyValue::Boolean(false)),
                "1" | "true" => Ok(PropertyValue::Boolean(true)),
                _ => Err(bad(type_name, text)),
            },
            "Int8" => text.parse().map(PropertyValue::Int8).map_err(|_| bad(type_name, text)),
            "UInt8" => text.parse().map(PropertyValue::UInt8).map_err(|_| bad(type_name, text)),
            "Int16" => text.parse().map(PropertyValue::Int16).map_err(|_| bad(type_name, text)),
            "UInt16" => text.parse().map(PropertyValue::UInt16).map_err(|_| bad(type_name, text)),
            "Int32" => text.parse().map(PropertyValue::Int32).map_err(|_| bad(type_name, text)),
            "UInt32" => text.parse().map(PropertyValue::UInt32).map_err(|_| bad(type_name, text)),
            "Int64" => text.parse().map(PropertyValue::Int64).map_err(|_| bad(type_name, text)),
            "UInt64" => text.parse().map(PropertyValue::UInt64).map_err(|_| bad(type_name, text)),
            "Float32" => text.parse().map(PropertyValue::Float32).map_err(|_| bad(type_name, text)),
            "Float64" => text.parse().map(PropertyValue::Float64).map_err(|_| bad(type_name, text)),
            "String" => Ok(PropertyValue::String(text.to_string())),
            "TimePoint" => DateTime::parse_from_rfc3339(text)
                .map(|t| PropertyValue::TimePoint(t.with_timezone(&Utc)))
                .map_err(|_| bad(type_name, text)),
            other => Err(XisfError::Format(format!("Unknown property type: {other}"))),
        }
    }
}

// ── Properties ───────────────────────────────────────────────────────────────

/// Declared shape of a deferred vector/matrix payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayShape {
    Vector { length: usize },
    Matrix { rows: usize, cols: usize },
}

impl ArrayShape {
    /// Declared element count, `None` when rows x cols overflows.  Shapes
    /// come straight from header attributes, so the product is not trusted.
    pub fn element_count(self) -> Option<usize> {
        match self {
            ArrayShape::Vector { length } => Some(length),
            ArrayShape::Matrix { rows, cols } => rows.checked_mul(cols),
        }
    }
}

/// A vector/matrix payload parsed from a header but not yet materialized.
#[derive(Debug)]
pub struct DeferredArray {
    pub shape: ArrayShape,
    pub format: ElementFormat,
    pub block: InputBlock,
}

/// Either an already-typed value or a lazily loaded array payload.
#[derive(Debug)]
pub enum PropertyPayload {
    Value(PropertyValue),
    Deferred(DeferredArray),
}

#[derive(Debug)]
pub struct Property {
    pub id: String,
    pub payload: PropertyPayload,
    pub comment: Option<String>,
}

impl Property {
    pub fn new(id: impl Into<String>, value: PropertyValue) -> Result<Self> {
        let id = id.into();
        validate_property_id(&id)?;
        Ok(Self { id, payload: PropertyPayload::Value(value), comment: None })
    }

    pub fn deferred(id: impl Into<String>, array: DeferredArray) -> Result<Self> {
        let id = id.into();
        validate_property_id(&id)?;
        Ok(Self { id, payload: PropertyPayload::Deferred(array), comment: None })
    }
}

/// Property ids are namespaced identifiers like `Observation:Time:Start`.
fn validate_property_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with(':')
        && !id.ends_with(':')
        && id.split(':').all(|part| {
            !part.is_empty()
                && part.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(XisfError::Structural(format!("Invalid property id: {id:?}")))
    }
}

/// Insertion-ordered property collection with unique ids.
///
/// Order is preserved for markup round-tripping; lookup goes through a side
/// map from id to position, kept in step with every mutation.
#[derive(Debug, Default)]
pub struct PropertyList {
    items: Vec<Property>,
    index: HashMap<String, usize>,
}

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Append a property; a duplicate id is rejected.
    pub fn insert(&mut self, property: Property) -> Result<()> {
        if self.index.contains_key(&property.id) {
            return Err(XisfError::Structural(format!("Duplicate property id: {}", property.id)));
        }
        self.index.insert(property.id.clone(), self.items.len());
        self.items.push(property);
        Ok(())
    }

    /// Insert, or overwrite an existing property in place (its position in
    /// the insertion order is kept).
    pub fn replace(&mut self, property: Property) {
        match self.index.get(&property.id) {
            Some(&pos) => self.items[pos] = property,
            None => {
                self.index.insert(property.id.clone(), self.items.len());
                self.items.push(property);
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Property> {
        let pos = self.index.remove(id)?;
        let removed = self.items.remove(pos);
        for (i, item) in self.items.iter().enumerate().skip(pos) {
            self.index.insert(item.id.clone(), i);
        }
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<&Property> {
        self.index.get(id).map(|&pos| &self.items[pos])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Property> {
        self.index.get(id).map(|&pos| &mut self.items[pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Property> {
        self.items.iter_mut()
    }
}

// ── FITS keywords ────────────────────────────────────────────────────────────

/// A FITS keyword carried through from acquisition software.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitsKeyword {
    pub name: String,
    pub value: String,
    pub comment: String,
}

impl FitsKeyword {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        comment: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > 8 || !name.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(XisfError::Structural(format!("Invalid FITS keyword name: {name:?}")));
        }
        Ok(Self { name, value: value.into(), comment: comment.into() })
    }
}

// ── Images ───────────────────────────────────────────────────────────────────

/// Pixel payload of an image: raw samples on the write side, a lazy block on
/// the read side.
#[derive(Debug)]
pub enum ImageData {
    Raw(Vec<u8>),
    Block(InputBlock),
}

#[derive(Debug)]
pub struct Image {
    pub id: Option<String>,
    /// Spatial dimensions, width first.
    pub geometry: Vec<usize>,
    pub channel_count: usize,
    pub sample_format: SampleFormat,
    pub color_space: ColorSpace,
    pub data: ImageData,
    pub thumbnail: Option<Box<Image>>,
    pub properties: PropertyList,
    pub fits_keywords: Vec<FitsKeyword>,
    pub cfa: Option<ColorFilterArray>,
    pub rgb_working_space: Option<RgbWorkingSpace>,
    pub display_function: Option<DisplayFunction>,
    pub resolution: Option<Resolution>,
}

impl Image {
    /// Build a write-side image from raw sample bytes.  The byte length must
    /// match the geometry and sample format exactly.
    pub fn new(
        geometry: Vec<usize>,
        channel_count: usize,
        sample_format: SampleFormat,
        data: Vec<u8>,
    ) -> Result<Self> {
        if geometry.is_empty() || geometry.contains(&0) || channel_count == 0 {
            return Err(XisfError::Structural(format!(
                "Malformed geometry: {geometry:?} x {channel_count}"
            )));
        }
        let expected = geometry
            .iter()
            .try_fold(channel_count, |acc, &dim| acc.checked_mul(dim))
            .and_then(|samples| samples.checked_mul(sample_format.bytes_per_sample()))
            .ok_or_else(|| {
                XisfError::Structural(format!(
                    "Geometry overflows: {geometry:?} x {channel_count}"
                ))
            })?;
        if data.len() != expected {
            return Err(XisfError::Structural(format!(
                "Pixel payload is {} bytes, geometry requires {expected}",
                data.len()
            )));
        }
        Ok(Self {
            id: None,
            geometry,
            channel_count,
            sample_format,
            color_space: ColorSpace::default(),
            data: ImageData::Raw(data),
            thumbnail: None,
            properties: PropertyList::new(),
            fits_keywords: Vec::new(),
            cfa: None,
            rgb_working_space: None,
            display_function: None,
            resolution: None,
        })
    }

    /// Total sample count across all channels, `None` on overflow.
    pub fn sample_count(&self) -> Option<usize> {
        self.geometry.iter().try_fold(self.channel_count, |acc, &dim| acc.checked_mul(dim))
    }

    /// Expected pixel payload length in bytes, `None` on overflow.
    pub fn expected_data_len(&self) -> Option<usize> {
        self.sample_count()?.checked_mul(self.sample_format.bytes_per_sample())
    }

    /// Geometry attribute text: dimensions then channel count, colon-joined.
    pub fn geometry_attribute(&self) -> String {
        let mut parts: Vec<String> = self.geometry.iter().map(usize::to_string).collect();
        parts.push(self.channel_count.to_string());
        parts.join(":")
    }
}

/// Parse a geometry attribute into (dimensions, channel count).
pub fn parse_geometry(text: &str) -> Result<(Vec<usize>, usize)> {
    let fields: Vec<usize> = text
        .split(':')
        .map(|p| p.parse::<usize>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| XisfError::Structural(format!("Malformed geometry: {text}")))?;
    if fields.len() < 2 || fields.contains(&0) {
        return Err(XisfError::Structural(format!("Malformed geometry: {text}")));
    }
    let (dims, channels) = fields.split_at(fields.len() - 1);
    Ok((dims.to_vec(), channels[0]))
}

// ── Document ─────────────────────────────────────────────────────────────────

/// The in-memory graph the reader produces and the writer consumes.
#[derive(Debug, Default)]
pub struct Document {
    pub images: Vec<Image>,
    pub properties: PropertyList,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_list_rejects_duplicate_ids() {
        let mut list = PropertyList::new();
        list.insert(Property::new("Instrument:Camera", PropertyValue::Int32(1)).unwrap()).unwrap();
        let dup = Property::new("Instrument:Camera", PropertyValue::Int32(2)).unwrap();
        assert!(list.insert(dup).is_err());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn property_list_preserves_insertion_order() {
        let mut list = PropertyList::new();
        for id in ["c", "a", "b"] {
            list.insert(Property::new(id, PropertyValue::Boolean(true)).unwrap()).unwrap();
        }
        let order: Vec<&str> = list.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(order, ["c", "a", "b"]);

        list.remove("a");
        let order: Vec<&str> = list.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(order, ["c", "b"]);
        assert_eq!(list.get("b").unwrap().id, "b");
    }

    #[test]
    fn property_list_replace_keeps_position() {
        let mut list = PropertyList::new();
        list.insert(Property::new("x", PropertyValue::Int32(1)).unwrap()).unwrap();
        list.insert(Property::new("y", PropertyValue::Int32(2)).unwrap()).unwrap();
        list.replace(Property::new("x", PropertyValue::Int32(9)).unwrap());
        let order: Vec<&str> = list.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(order, ["x", "y"]);
        match list.get("x").unwrap().payload {
            PropertyPayload::Value(PropertyValue::Int32(v)) => assert_eq!(v, 9),
            _ => panic!("unexpected payload"),
        }
    }

    #[test]
    fn property_id_validation() {
        assert!(validate_property_id("Observation:Time:Start").is_ok());
        assert!(validate_property_id("_private").is_ok());
        assert!(validate_property_id("").is_err());
        assert!(validate_property_id(":leading").is_err());
        assert!(validate_property_id("trailing:").is_err());
        assert!(validate_property_id("1numeric").is_err());
        assert!(validate_property_id("with space").is_err());
    }

    #[test]
    fn vector_value_le_roundtrip() {
        let cases = [
            VectorValue::I16(vec![-2, 1, 300]),
            VectorValue::UI32(vec![1, 2, 0xDEAD_BEEF]),
            VectorValue::F64(vec![0.5, -1.25, 1e300]),
            VectorValue::UI8(vec![1, 2, 3]),
        ];
        for value in cases {
            let bytes = value.to_le_bytes();
            assert_eq!(bytes.len(), value.len() * value.format().byte_width());
            let back = VectorValue::from_le_bytes(value.format(), &bytes).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn vector_value_rejects_ragged_payload() {
        assert!(VectorValue::from_le_bytes(ElementFormat::I32, &[1, 2, 3]).is_err());
    }

    #[test]
    fn scalar_parse_and_text_roundtrip() {
        let v = PropertyValue::parse_scalar("Int16", "-42").unwrap();
        assert_eq!(v, PropertyValue::Int16(-42));
        assert_eq!(v.to_value_text().unwrap(), "-42");

        assert_eq!(
            PropertyValue::parse_scalar("Boolean", "true").unwrap(),
            PropertyValue::Boolean(true)
        );
        assert_eq!(PropertyValue::Boolean(false).to_value_text().unwrap(), "0");

        let t = PropertyValue::parse_scalar("TimePoint", "2024-03-01T12:00:00+00:00").unwrap();
        assert!(matches!(t, PropertyValue::TimePoint(_)));

        assert!(PropertyValue::parse_scalar("UInt8", "256").is_err());
        assert!(PropertyValue::parse_scalar("Complex32", "1").is_err());
    }

    #[test]
    fn type_name_dispatch() {
        assert_eq!(PropertyValue::Vector(VectorValue::F32(vec![])).type_name(), "F32Vector");
        assert_eq!(
            PropertyValue::Matrix { rows: 0, cols: 0, elements: VectorValue::I64(vec![]) }
                .type_name(),
            "I64Matrix"
        );
        assert_eq!(ElementFormat::from_type_name("UI16Vector"), Some((ElementFormat::UI16, false)));
        assert_eq!(ElementFormat::from_type_name("F64Matrix"), Some((ElementFormat::F64, true)));
        assert_eq!(ElementFormat::from_type_name("F64Tensor"), None);
    }

    #[test]
    fn geometry_parse() {
        assert_eq!(parse_geometry("3:1:1").unwrap(), (vec![3, 1], 1));
        assert_eq!(parse_geometry("1024:768:3").unwrap(), (vec![1024, 768], 3));
        assert!(parse_geometry("1024").is_err());
        assert!(parse_geometry("0:2:1").is_err());
        assert!(parse_geometry("a:b:c").is_err());
    }

    #[test]
    fn image_payload_length_is_checked() {
        assert!(Image::new(vec![3, 1], 1, SampleFormat::UInt8, vec![1, 2, 3]).is_ok());
        assert!(Image::new(vec![3, 1], 1, SampleFormat::UInt16, vec![1, 2, 3]).is_err());
        assert!(Image::new(vec![], 1, SampleFormat::UInt8, vec![]).is_err());
    }

    #[test]
    fn oversized_declarations_do_not_overflow() {
        assert!(Image::new(vec![usize::MAX, 2], 1, SampleFormat::UInt8, Vec::new()).is_err());
        assert!(Image::new(vec![usize::MAX], 2, SampleFormat::UInt16, Vec::new()).is_err());
        assert_eq!(ArrayShape::Matrix { rows: usize::MAX, cols: 2 }.element_count(), None);
        assert_eq!(ArrayShape::Matrix { rows: 3, cols: 4 }.element_count(), Some(12));
        assert_eq!(ArrayShape::Vector { length: 7 }.element_count(), Some(7));
    }

    #[test]
    fn fits_keyword_name_rules() {
        assert!(FitsKeyword::new("EXPTIME", "1.5", "seconds").is_ok());
        assert!(FitsKeyword::new("", "x", "").is_err());
        assert!(FitsKeyword::new("TOOLONGNAME", "x", "").is_err());
        assert!(FitsKeyword::new("BAD KEY", "x", "").is_err());
    }
}
