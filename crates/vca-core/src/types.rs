//! Error and result types shared by every stage of the VCA pipeline.

/// Result type for VCA operations
pub type VcaResult<T> = Result<T, VcaError>;

/// Errors that can occur while estimating, fitting or comparing power spectra
#[derive(Debug, thiserror::Error)]
pub enum VcaError {
    /// Invalid option value or malformed combination of options
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A unit-bearing quantity could not be converted to pixel units
    #[error("Unit conversion error: {0}")]
    UnitConversion(String),

    /// Too few usable points inside the fit range
    #[error("Fit range [{low_cut:.4e}, {high_cut:.4e}] 1/pix holds {found} usable points, need at least {required}")]
    FitRange {
        low_cut: f64,
        high_cut: f64,
        found: usize,
        required: usize,
    },

    /// Invalid spectral regridding target
    #[error("Regrid error: {0}")]
    Regrid(String),

    /// Cube data or header is unusable
    #[error("Invalid cube: {0}")]
    InvalidCube(String),

    /// Reading or writing a file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding persisted state failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl VcaError {
    /// Check if the error comes from user-supplied options rather than data
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            VcaError::Configuration(_) | VcaError::UnitConversion(_)
        )
    }
}

impl From<serde_json::Error> for VcaError {
    fn from(e: serde_json::Error) -> Self {
        VcaError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_range_message() {
        let err = VcaError::FitRange {
            low_cut: 0.1,
            high_cut: 0.2,
            found: 1,
            required: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("holds 1 usable points"));
        assert!(!err.is_config_error());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(VcaError::Configuration("x".into()).is_config_error());
        assert!(VcaError::UnitConversion("x".into()).is_config_error());
        assert!(!VcaError::Regrid("x".into()).is_config_error());
    }
}
