//! Unit-bearing quantities
//!
//! Fit cutoffs and breakpoints may be given per pixel, per angle on the sky,
//! or per physical length at the source. Everything downstream of the
//! estimator works in cycles per pixel, so each quantity carries its unit tag
//! and converts through a [`UnitContext`] built from the cube header and an
//! optional source distance.
//!
//! ```text
//! f_pix = f_ang  [1/deg] * |CDELT2| [deg]
//! f_pix = f_phys [1/pc]  * distance [pc] * |CDELT2| [rad]
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{VcaError, VcaResult};

/// Angular unit used by angular frequencies and pixel scales
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AngleUnit {
    Degree,
    Arcminute,
    Arcsecond,
    Radian,
}

impl AngleUnit {
    /// Size of one unit in degrees
    pub fn in_degrees(&self) -> f64 {
        match self {
            AngleUnit::Degree => 1.0,
            AngleUnit::Arcminute => 1.0 / 60.0,
            AngleUnit::Arcsecond => 1.0 / 3600.0,
            AngleUnit::Radian => 180.0 / std::f64::consts::PI,
        }
    }
}

/// Physical length unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    Parsec,
    Kiloparsec,
    /// Astronomical unit
    Au,
}

impl LengthUnit {
    /// Size of one unit in parsecs
    pub fn in_parsecs(&self) -> f64 {
        match self {
            LengthUnit::Parsec => 1.0,
            LengthUnit::Kiloparsec => 1.0e3,
            LengthUnit::Au => 1.0 / 206_264.806_247_096_36,
        }
    }
}

/// A length with its unit (used for source distances)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Length {
    pub value: f64,
    pub unit: LengthUnit,
}

impl Length {
    pub fn new(value: f64, unit: LengthUnit) -> Self {
        Self { value, unit }
    }

    pub fn parsecs(value: f64) -> Self {
        Self::new(value, LengthUnit::Parsec)
    }

    /// Value converted to parsecs
    pub fn to_parsecs(&self) -> f64 {
        self.value * self.unit.in_parsecs()
    }
}

/// A spatial frequency tagged with its unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FrequencyQuantity {
    /// Cycles per pixel
    Pixel { value: f64 },
    /// Cycles per angular unit on the sky
    Angular { value: f64, unit: AngleUnit },
    /// Cycles per physical length at the source distance
    Physical { value: f64, unit: LengthUnit },
}

impl FrequencyQuantity {
    pub fn per_pixel(value: f64) -> Self {
        FrequencyQuantity::Pixel { value }
    }

    pub fn per_angle(value: f64, unit: AngleUnit) -> Self {
        FrequencyQuantity::Angular { value, unit }
    }

    pub fn per_length(value: f64, unit: LengthUnit) -> Self {
        FrequencyQuantity::Physical { value, unit }
    }

    /// Raw numeric value, in whatever unit the quantity carries
    pub fn value(&self) -> f64 {
        match *self {
            FrequencyQuantity::Pixel { value }
            | FrequencyQuantity::Angular { value, .. }
            | FrequencyQuantity::Physical { value, .. } => value,
        }
    }

    /// Convert to cycles per pixel.
    ///
    /// Angular quantities need the pixel scale; physical quantities need both
    /// the pixel scale and a distance.
    pub fn to_pixel(&self, ctx: &UnitContext) -> VcaResult<f64> {
        let converted = match *self {
            FrequencyQuantity::Pixel { value } => value,
            FrequencyQuantity::Angular { value, unit } => {
                let per_degree = value / unit.in_degrees();
                per_degree * ctx.require_pixel_scale()?
            }
            FrequencyQuantity::Physical { value, unit } => {
                let distance = ctx.distance.ok_or_else(|| {
                    VcaError::UnitConversion(format!(
                        "physical frequency {} needs a source distance",
                        self
                    ))
                })?;
                let per_parsec = value / unit.in_parsecs();
                // Small-angle: one radian subtends `distance` parsecs.
                let per_radian = per_parsec * distance.to_parsecs();
                per_radian * ctx.require_pixel_scale()?.to_radians()
            }
        };

        if !converted.is_finite() || converted < 0.0 {
            return Err(VcaError::UnitConversion(format!(
                "{} converts to invalid pixel frequency {}",
                self, converted
            )));
        }
        Ok(converted)
    }
}

impl fmt::Display for FrequencyQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrequencyQuantity::Pixel { value } => write!(f, "{} 1/pix", value),
            FrequencyQuantity::Angular { value, unit } => write!(f, "{} 1/{:?}", value, unit),
            FrequencyQuantity::Physical { value, unit } => write!(f, "{} 1/{:?}", value, unit),
        }
    }
}

/// Conversion context for [`FrequencyQuantity`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UnitContext {
    /// Pixel scale in degrees (absolute value of CDELT2)
    pub pixel_scale_deg: Option<f64>,
    /// Source distance
    pub distance: Option<Length>,
}

impl UnitContext {
    pub fn new(pixel_scale_deg: Option<f64>, distance: Option<Length>) -> Self {
        Self {
            pixel_scale_deg: pixel_scale_deg.map(f64::abs),
            distance,
        }
    }

    fn require_pixel_scale(&self) -> VcaResult<f64> {
        match self.pixel_scale_deg {
            Some(scale) if scale > 0.0 && scale.is_finite() => Ok(scale),
            _ => Err(VcaError::UnitConversion(
                "header has no usable pixel scale (CDELT2)".to_string(),
            )),
        }
    }
}
