use folio_core::config::{env_or, env_string_or};
use folio_core::error::CoreError;
use folio_core::inspection::MAX_IMAGE_PIXELS;
use folio_core::ocr::validate_language;

/// Default OCR language when a page does not name one.
pub const DEFAULT_LANGUAGE: &str = "vie";

/// Pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub default_language: String,
    /// Images with a larger `width * height` are rejected before OCR.
    pub max_image_pixels: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_language: DEFAULT_LANGUAGE.to_string(),
            max_image_pixels: MAX_IMAGE_PIXELS,
        }
    }
}

impl PipelineConfig {
    /// Load from `OCR_DEFAULT_LANGUAGE` and `OCR_MAX_IMAGE_PIXELS`.
    pub fn from_env() -> Result<Self, CoreError> {
        let config = Self {
            default_language: env_string_or("OCR_DEFAULT_LANGUAGE", DEFAULT_LANGUAGE),
            max_image_pixels: env_or("OCR_MAX_IMAGE_PIXELS", MAX_IMAGE_PIXELS)?,
        };
        validate_language(&config.default_language)?;
        if config.max_image_pixels == 0 {
            return Err(CoreError::Validation(
                "OCR_MAX_IMAGE_PIXELS must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    /// The page's language, or the default when it is blank.
    pub fn language_or_default(&self, language: Option<&str>) -> String {
        match language.map(str::trim) {
            Some(lang) if !lang.is_empty() => lang.to_string(),
            _ => self.default_language.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_language_falls_back() {
        let config = PipelineConfig::default();
        assert_eq!(config.language_or_default(None), "vie");
        assert_eq!(config.language_or_default(Some("  ")), "vie");
        assert_eq!(config.language_or_default(Some("eng")), "eng");
    }
}
