//! Configuration errors and the validation trait every section implements.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The document could not be read or is not valid JSON for its type.
    #[error("failed to parse configuration: {message}")]
    Parse { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Checks a configuration section before anything is built from it.
///
/// The provided helpers cover the checks several sections share.
pub trait ConfigValidator {
    fn validate(&self) -> Result<(), ConfigError>;

    fn get_defaults() -> Self
    where
        Self: Sized;

    fn validate_image_dimensions(&self, width: u32, height: u32) -> Result<(), ConfigError> {
        if width == 0 || height == 0 {
            return Err(ConfigError::invalid(format!(
                "image geometry {}x{} has a zero side",
                width, height
            )));
        }
        Ok(())
    }

    /// Thresholds and confidences live in `[0, 1]`.
    fn validate_confidence_threshold(&self, threshold: f32) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::invalid(format!(
                "threshold {} is outside [0, 1]",
                threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BareSection;

    impl ConfigValidator for BareSection {
        fn validate(&self) -> Result<(), ConfigError> {
            Ok(())
        }

        fn get_defaults() -> Self {
            BareSection
        }
    }

    #[test]
    fn test_confidence_threshold_bounds() {
        assert!(BareSection.validate_confidence_threshold(0.0).is_ok());
        assert!(BareSection.validate_confidence_threshold(1.0).is_ok());
        assert!(BareSection.validate_confidence_threshold(1.5).is_err());
        assert!(BareSection.validate_confidence_threshold(-0.1).is_err());
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(BareSection.validate_image_dimensions(0, 64).is_err());
        assert!(BareSection.validate_image_dimensions(256, 64).is_ok());
    }
}
