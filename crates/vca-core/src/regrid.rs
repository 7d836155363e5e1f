//! Spectral Regridding
//!
//! Downsamples the spectral axis by averaging blocks of `f` adjacent channels.
//! The target width may be a multiple of the current channel width or a
//! physical velocity/frequency width; either way it must resolve to an
//! integer factor. Block means with `cdelt3 * f` keep the integrated flux
//! `sum * |cdelt3|` of the covered channels unchanged.

use ndarray::{s, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::cube::{SpectralAxis, SpectralCube};
use crate::types::{VcaError, VcaResult};

/// Relative tolerance for an integer regrid factor
const FACTOR_TOLERANCE: f64 = 1e-6;

/// Velocity units for channel widths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VelocityUnit {
    MetersPerSecond,
    KilometersPerSecond,
}

impl VelocityUnit {
    fn in_meters_per_second(self) -> f64 {
        match self {
            VelocityUnit::MetersPerSecond => 1.0,
            VelocityUnit::KilometersPerSecond => 1e3,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            VelocityUnit::MetersPerSecond => "m/s",
            VelocityUnit::KilometersPerSecond => "km/s",
        }
    }
}

/// Frequency units for channel widths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyUnit {
    Hz,
    KHz,
    MHz,
    GHz,
}

impl FrequencyUnit {
    fn in_hertz(self) -> f64 {
        match self {
            FrequencyUnit::Hz => 1.0,
            FrequencyUnit::KHz => 1e3,
            FrequencyUnit::MHz => 1e6,
            FrequencyUnit::GHz => 1e9,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            FrequencyUnit::Hz => "Hz",
            FrequencyUnit::KHz => "kHz",
            FrequencyUnit::MHz => "MHz",
            FrequencyUnit::GHz => "GHz",
        }
    }
}

/// Target channel width for regridding.
///
/// Serialized as its display string, e.g. `"2 channels"` or `"0.4 km/s"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChannelWidth {
    /// Multiple of the current channel width
    Pixels(f64),
    /// Velocity width
    Velocity { value: f64, unit: VelocityUnit },
    /// Frequency width
    Frequency { value: f64, unit: FrequencyUnit },
}

impl ChannelWidth {
    pub fn km_per_s(value: f64) -> Self {
        ChannelWidth::Velocity {
            value,
            unit: VelocityUnit::KilometersPerSecond,
        }
    }

    pub fn m_per_s(value: f64) -> Self {
        ChannelWidth::Velocity {
            value,
            unit: VelocityUnit::MetersPerSecond,
        }
    }

    /// Resolve to an integer downsampling factor for a cube
    pub fn factor(&self, cube: &SpectralCube) -> VcaResult<usize> {
        let header = &cube.header;
        let current = header.cdelt3.abs();
        let raw = match *self {
            ChannelWidth::Pixels(multiple) => multiple,
            ChannelWidth::Velocity { value, unit } => {
                if header.spectral_axis != SpectralAxis::Velocity {
                    return Err(VcaError::UnitConversion(format!(
                        "cannot express a {} {} channel width on a frequency axis",
                        value,
                        unit.symbol()
                    )));
                }
                value.abs() * unit.in_meters_per_second() / current
            }
            ChannelWidth::Frequency { value, unit } => {
                if header.spectral_axis != SpectralAxis::Frequency {
                    return Err(VcaError::UnitConversion(format!(
                        "cannot express a {} {} channel width on a velocity axis",
                        value,
                        unit.symbol()
                    )));
                }
                value.abs() * unit.in_hertz() / current
            }
        };

        if !raw.is_finite() || raw <= 0.0 {
            return Err(VcaError::Regrid(format!("invalid channel width {}", self)));
        }
        let rounded = raw.round();
        if rounded < 1.0 {
            return Err(VcaError::Regrid(format!(
                "channel width {} is narrower than the current width (factor {:.4}); upsampling is not supported",
                self, raw
            )));
        }
        if ((raw - rounded) / rounded).abs() > FACTOR_TOLERANCE {
            return Err(VcaError::Regrid(format!(
                "channel width {} is not an integer multiple of the current width (factor {:.6})",
                self, raw
            )));
        }

        let factor = rounded as usize;
        let nchan = cube.num_channels();
        if factor > nchan {
            return Err(VcaError::Regrid(format!(
                "regrid factor {} exceeds the number of channels ({})",
                factor, nchan
            )));
        }
        Ok(factor)
    }
}

impl fmt::Display for ChannelWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelWidth::Pixels(multiple) => write!(f, "{} channels", multiple),
            ChannelWidth::Velocity { value, unit } => write!(f, "{} {}", value, unit.symbol()),
            ChannelWidth::Frequency { value, unit } => write!(f, "{} {}", value, unit.symbol()),
        }
    }
}

impl FromStr for ChannelWidth {
    type Err = VcaError;

    /// Parse `"2"`, `"2 pix"`, `"0.4 km/s"`, `"500 kHz"` and similar
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bytes = s.as_bytes();
        // First unit character; an `e` followed by a digit or sign is an exponent
        let split = s
            .char_indices()
            .find(|&(i, c)| {
                let exponent = matches!(c, 'e' | 'E')
                    && i > 0
                    && bytes
                        .get(i + 1)
                        .is_some_and(|b| b.is_ascii_digit() || *b == b'-' || *b == b'+');
                (c.is_ascii_alphabetic() || c == '/') && !exponent
            })
            .map_or(s.len(), |(i, _)| i);
        let (number, unit) = s.split_at(split);
        let value: f64 = number.trim().parse().map_err(|_| {
            VcaError::Configuration(format!("invalid channel width '{}'", s))
        })?;

        let width = match unit.trim() {
            "" | "pix" | "pixel" | "pixels" | "chan" | "channels" => ChannelWidth::Pixels(value),
            "m/s" => ChannelWidth::m_per_s(value),
            "km/s" => ChannelWidth::km_per_s(value),
            "Hz" => ChannelWidth::Frequency {
                value,
                unit: FrequencyUnit::Hz,
            },
            "kHz" => ChannelWidth::Frequency {
                value,
                unit: FrequencyUnit::KHz,
            },
            "MHz" => ChannelWidth::Frequency {
                value,
                unit: FrequencyUnit::MHz,
            },
            "GHz" => ChannelWidth::Frequency {
                value,
                unit: FrequencyUnit::GHz,
            },
            other => {
                return Err(VcaError::UnitConversion(format!(
                    "unknown channel width unit '{}'",
                    other
                )))
            }
        };
        Ok(width)
    }
}

impl TryFrom<String> for ChannelWidth {
    type Error = VcaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelWidth> for String {
    fn from(width: ChannelWidth) -> Self {
        width.to_string()
    }
}

/// Average blocks of channels to reach `width`
pub fn regrid_cube(cube: &SpectralCube, width: ChannelWidth) -> VcaResult<SpectralCube> {
    cube.validate()?;
    let factor = width.factor(cube)?;
    if factor == 1 {
        return Ok(cube.clone());
    }

    let (nchan, ny, nx) = cube.shape();
    let out_chan = nchan / factor;
    let remainder = nchan - out_chan * factor;
    if remainder > 0 {
        warn!(
            dropped = remainder,
            factor, "Channel count is not a multiple of the regrid factor; dropping trailing channels"
        );
    }

    let mut data = Array3::<f64>::zeros((out_chan, ny, nx));
    for (c, mut out) in data.axis_iter_mut(Axis(0)).enumerate() {
        let block = cube.data.slice(s![c * factor..(c + 1) * factor, .., ..]);
        if let Some(mean) = block.mean_axis(Axis(0)) {
            out.assign(&mean);
        }
    }

    let mut header = cube.header.clone();
    header.cdelt3 *= factor as f64;
    debug!(
        factor,
        channels_in = nchan,
        channels_out = out_chan,
        cdelt3 = header.cdelt3,
        "Regridded spectral axis"
    );
    SpectralCube::new(data, header)
}
