//! Descriptive-metadata value objects.
//!
//! These are plain validated data holders — no algorithmic content.  Each
//! validates its invariants at construction and serializes to a fixed
//! attribute set on request; the reader rebuilds them from an attribute map
//! and treats a violation as a per-element (recoverable) failure.

use std::collections::HashMap;

use crate::error::{Result, XisfError};

fn require<'a>(attrs: &'a HashMap<String, String>, key: &str, element: &str) -> Result<&'a str> {
    attrs
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| XisfError::Structural(format!("<{element}> is missing '{key}'")))
}

fn parse_f64(text: &str, key: &str) -> Result<f64> {
    text.parse::<f64>()
        .map_err(|_| XisfError::Format(format!("Invalid numeric value for '{key}': {text}")))
}

fn parse_f64_list(text: &str, key: &str) -> Result<Vec<f64>> {
    text.split(':').map(|p| parse_f64(p, key)).collect()
}

fn join_f64(values: &[f64]) -> String {
    values.iter().map(f64::to_string).collect::<Vec<_>>().join(":")
}

// ── Color filter array ───────────────────────────────────────────────────────

/// Mosaic pattern of a color filter array, e.g. `RGGB` for a 2x2 Bayer CFA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorFilterArray {
    pattern: String,
    width: usize,
    height: usize,
    pub name: Option<String>,
}

impl ColorFilterArray {
    pub fn new(pattern: impl Into<String>, width: usize, height: usize) -> Result<Self> {
        let pattern = pattern.into();
        if width == 0 || height == 0 || pattern.len() != width * height {
            return Err(XisfError::Structural(format!(
                "CFA pattern {:?} does not cover {width}x{height} cells",
                pattern
            )));
        }
        if !pattern.chars().all(|c| "RGBWCMY".contains(c)) {
            return Err(XisfError::Structural(format!("Invalid CFA pattern element in {pattern:?}")));
        }
        Ok(Self { pattern, width, height, name: None })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn from_attributes(attrs: &HashMap<String, String>) -> Result<Self> {
        let pattern = require(attrs, "pattern", "ColorFilterArray")?;
        let width = require(attrs, "width", "ColorFilterArray")?
            .parse()
            .map_err(|_| XisfError::Format("Invalid CFA width".into()))?;
        let height = require(attrs, "height", "ColorFilterArray")?
            .parse()
            .map_err(|_| XisfError::Format("Invalid CFA height".into()))?;
        let mut cfa = Self::new(pattern, width, height)?;
        cfa.name = attrs.get("name").cloned();
        Ok(cfa)
    }

    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("pattern", self.pattern.clone()),
            ("width", self.width.to_string()),
            ("height", self.height.to_string()),
        ];
        if let Some(name) = &self.name {
            out.push(("name", name.clone()));
        }
        out
    }
}

// ── RGB working space ────────────────────────────────────────────────────────

/// Transfer function of an RGB working space: a pure power law or the
/// piecewise sRGB curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransferFunction {
    Power(f64),
    Srgb,
}

/// Colorimetric definition of the working space pixel values live in.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbWorkingSpace {
    pub transfer: TransferFunction,
    /// Relative luminance coefficients of the three channels.
    pub luminance: [f64; 3],
    /// CIE chromaticity x coordinates of the three primaries.
    pub chromaticity_x: [f64; 3],
    /// CIE chromaticity y coordinates of the three primaries.
    pub chromaticity_y: [f64; 3],
    pub name: Option<String>,
}

impl RgbWorkingSpace {
    pub fn new(
        transfer: TransferFunction,
        luminance: [f64; 3],
        chromaticity_x: [f64; 3],
        chromaticity_y: [f64; 3],
    ) -> Result<Self> {
        if let TransferFunction::Power(gamma) = transfer {
            if !(gamma.is_finite() && gamma > 0.0) {
                return Err(XisfError::Structural(format!("Invalid gamma: {gamma}")));
            }
        }
        let coords_ok = chromaticity_x
            .iter()
            .chain(chromaticity_y.iter())
            .all(|c| (0.0..=1.0).contains(c));
        if !coords_ok {
            return Err(XisfError::Structural("Chromaticity coordinates outside [0,1]".into()));
        }
        if luminance.iter().any(|y| !(y.is_finite() && *y >= 0.0)) {
            return Err(XisfError::Structural("Negative luminance coefficient".into()));
        }
        Ok(Self { transfer, luminance, chromaticity_x, chromaticity_y, name: None })
    }

    pub fn from_attributes(attrs: &HashMap<String, String>) -> Result<Self> {
        let gamma_text = require(attrs, "gamma", "RGBWorkingSpace")?;
        let transfer = if gamma_text.eq_ignore_ascii_case("srgb") {
            TransferFunction::Srgb
        } else {
            TransferFunction::Power(parse_f64(gamma_text, "gamma")?)
        };
        let take3 = |key: &str| -> Result<[f64; 3]> {
            let list = parse_f64_list(require(attrs, key, "RGBWorkingSpace")?, key)?;
            list.try_into().map_err(|_| {
                XisfError::Structural(format!("'{key}' must hold exactly 3 values"))
            })
        };
        let mut ws = Self::new(transfer, take3("y")?, take3("x")?, take3("Y")?)?;
        ws.name = attrs.get("name").cloned();
        Ok(ws)
    }

    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        let gamma = match self.transfer {
            TransferFunction::Power(g) => g.to_string(),
            TransferFunction::Srgb => "sRGB".to_string(),
        };
        let mut out = vec![
            ("gamma", gamma),
            ("y", join_f64(&self.luminance)),
            ("x", join_f64(&self.chromaticity_x)),
            ("Y", join_f64(&self.chromaticity_y)),
        ];
        if let Some(name) = &self.name {
            out.push(("name", name.clone()));
        }
        out
    }
}

// ── Display function ─────────────────────────────────────────────────────────

/// Screen transfer function: shadows/midtones/highlights clipping points per
/// channel (RGB plus a combined luminance slot).
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayFunction {
    pub shadows: [f64; 4],
    pub midtones: [f64; 4],
    pub highlights: [f64; 4],
    pub name: Option<String>,
}

impl DisplayFunction {
    pub fn new(shadows: [f64; 4], midtones: [f64; 4], highlights: [f64; 4]) -> Result<Self> {
        for i in 0..4 {
            if !(0.0..1.0).contains(&midtones[i]) || midtones[i] == 0.0 {
                return Err(XisfError::Structural(format!(
                    "Midtones balance outside (0,1): {}",
                    midtones[i]
                )));
            }
            if shadows[i] > highlights[i] {
                return Err(XisfError::Structural(format!(
                    "Shadows {} above highlights {}",
                    shadows[i], highlights[i]
                )));
            }
        }
        Ok(Self { shadows, midtones, highlights, name: None })
    }

    pub fn from_attributes(attrs: &HashMap<String, String>) -> Result<Self> {
        let take4 = |key: &str| -> Result<[f64; 4]> {
            let list = parse_f64_list(require(attrs, key, "DisplayFunction")?, key)?;
            list.try_into().map_err(|_| {
                XisfError::Structural(format!("'{key}' must hold exactly 4 values"))
            })
        };
        let mut df = Self::new(take4("s")?, take4("m")?, take4("h")?)?;
        df.name = attrs.get("name").cloned();
        Ok(df)
    }

    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("s", join_f64(&self.shadows)),
            ("m", join_f64(&self.midtones)),
            ("h", join_f64(&self.highlights)),
        ];
        if let Some(name) = &self.name {
            out.push(("name", name.clone()));
        }
        out
    }
}

// ── Resolution ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionUnit {
    Inch,
    Cm,
}

impl ResolutionUnit {
    pub fn name(self) -> &'static str {
        match self {
            ResolutionUnit::Inch => "inch",
            ResolutionUnit::Cm => "cm",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "inch" => Some(ResolutionUnit::Inch),
            "cm" => Some(ResolutionUnit::Cm),
            _ => None,
        }
    }
}

/// Physical pixel density for presentation purposes.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub horizontal: f64,
    pub vertical: f64,
    pub unit: ResolutionUnit,
}

impl Resolution {
    pub fn new(horizontal: f64, vertical: f64, unit: ResolutionUnit) -> Result<Self> {
        if !(horizontal.is_finite() && horizontal > 0.0 && vertical.is_finite() && vertical > 0.0)
        {
            return Err(XisfError::Structural(format!(
                "Non-positive resolution: {horizontal}x{vertical}"
            )));
        }
        Ok(Self { horizontal, vertical, unit })
    }

    pub fn from_attributes(attrs: &HashMap<String, String>) -> Result<Self> {
        let horizontal = parse_f64(require(attrs, "horizontal", "Resolution")?, "horizontal")?;
        let vertical = parse_f64(require(attrs, "vertical", "Resolution")?, "vertical")?;
        let unit = match attrs.get("unit") {
            Some(u) => ResolutionUnit::from_name(u)
                .ok_or_else(|| XisfError::Format(format!("Unknown resolution unit: {u}")))?,
            None => ResolutionUnit::Inch,
        };
        Self::new(horizontal, vertical, unit)
    }

    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        vec![
            ("horizontal", self.horizontal.to_string()),
            ("vertical", self.vertical.to_string()),
            ("unit", self.unit.name().to_string()),
        ]
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
