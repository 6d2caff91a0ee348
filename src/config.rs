use std::fmt::Display;
use std::path::{Path, PathBuf};

use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use crate::geometry::aspect_ratio;

/// How a grayscale region is turned into a binary image before contours are
/// extracted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "method")]
pub enum Binarization {
    /// Pixels at or below `cutoff` are foreground.
    #[serde(rename_all = "camelCase", rename = "fixed")]
    Fixed { cutoff: u8 },

    /// Pixels at least `offset` darker than their local mean are foreground.
    /// Preferred for regions with uneven illumination.
    #[serde(rename_all = "camelCase", rename = "adaptive")]
    Adaptive { block_radius: u32, offset: f32 },
}

/// Which column to discard when a region yields one column more than
/// expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DropSide {
    Leftmost,
    Rightmost,
}

/// Size and shape limits for contours accepted as bubbles in one kind of
/// region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FilterProfile {
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub min_aspect: f32,
    pub max_aspect: f32,
    /// Regions with fewer accepted candidates are not decoded.
    pub min_candidates: usize,
    /// A new column starts when the horizontal gap to the previous candidate
    /// exceeds this fraction of the average candidate width.
    pub column_gap_fraction: f32,
    pub binarization: Binarization,
}

impl FilterProfile {
    /// Hand-filled answer bubbles: lenient size and shape limits.
    pub fn mcq() -> Self {
        Self {
            min_width: 8,
            max_width: 60,
            min_height: 8,
            max_height: 60,
            min_aspect: 0.2,
            max_aspect: 5.0,
            min_candidates: 60,
            column_gap_fraction: 0.3,
            binarization: Binarization::Adaptive {
                block_radius: 9,
                offset: 5.0,
            },
        }
    }

    /// Machine-printed identifier bubbles: tight, near-round.
    pub fn identifier() -> Self {
        Self {
            min_width: 15,
            max_width: 55,
            min_height: 15,
            max_height: 55,
            min_aspect: 0.7,
            max_aspect: 1.3,
            min_candidates: 45,
            column_gap_fraction: 0.4,
            binarization: Binarization::Adaptive {
                block_radius: 9,
                offset: 5.0,
            },
        }
    }

    /// Whether a contour's bounding box could be a bubble. Size limits are
    /// exclusive, aspect limits inclusive.
    pub fn accepts(&self, rect: &Rect) -> bool {
        let ar = aspect_ratio(rect);
        rect.width() > self.min_width
            && rect.width() < self.max_width
            && rect.height() > self.min_height
            && rect.height() < self.max_height
            && ar >= self.min_aspect
            && ar <= self.max_aspect
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.min_width >= self.max_width || self.min_height >= self.max_height {
            return Err(ConfigError::invalid(field, "size limits are empty"));
        }
        if !(self.min_aspect > 0.0 && self.min_aspect <= self.max_aspect) {
            return Err(ConfigError::invalid(field, "aspect limits are empty"));
        }
        if !(self.column_gap_fraction > 0.0) {
            return Err(ConfigError::invalid(field, "columnGapFraction must be positive"));
        }
        validate_binarization(&self.binarization, field)
    }
}

/// Limits for the solid square fiducial markers printed in the sheet corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MarkerProfile {
    pub blur_sigma: f32,
    /// Pixels at or below this brightness (after blurring) are marker ink.
    pub cutoff: u8,
    pub min_aspect: f32,
    pub max_aspect: f32,
    /// Exclusive area band, in square pixels.
    pub min_area: f64,
    pub max_area: f64,
}

impl Default for MarkerProfile {
    fn default() -> Self {
        Self {
            blur_sigma: 1.1,
            cutoff: 200,
            min_aspect: 0.8,
            max_aspect: 1.2,
            min_area: 100.0,
            max_area: 10000.0,
        }
    }
}

/// Fractions of the rectified sheet trimmed from each edge before
/// segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Margins {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            top: 0.02,
            bottom: 0.02,
            left: 0.04,
            right: 0.02,
        }
    }
}

/// Everything the pipeline needs to know about the sheet layout. Loaded once
/// and never mutated while sheets are processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SheetConfig {
    pub num_answer_blocks: usize,
    pub questions_per_block: usize,
    pub identifier_digit_count: usize,
    pub markers: MarkerProfile,
    pub margins: Margins,
    pub mcq_filter_profile: FilterProfile,
    pub identifier_filter_profile: FilterProfile,
    /// Fraction of the identifier region's height holding printed headings
    /// above the digit grid.
    pub identifier_header_crop_pct: f32,
    pub min_jump_intensity: f64,
    /// Subtracted from the mean intensity when no clear gap separates marked
    /// from unmarked bubbles.
    pub threshold_fallback_offset: f64,
    pub row_tolerance_px: i32,
    /// Side dropped when an answer block shows a fifth choice column. The
    /// identifier grid always drops its leftmost column.
    pub column_drop_side: DropSide,
    pub separator_binarization: Binarization,
    pub horizontal_separator_fallback_pct: f32,
    pub horizontal_separator_min_width_pct: f32,
    pub horizontal_separator_max_height_px: u32,
    pub vertical_separator_kernel_height: u32,
    pub vertical_separator_min_height_pct: f32,
    pub vertical_separator_max_width_px: u32,
    pub vertical_separator_cluster_tolerance_px: u32,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            num_answer_blocks: 4,
            questions_per_block: 15,
            identifier_digit_count: 5,
            markers: MarkerProfile::default(),
            margins: Margins::default(),
            mcq_filter_profile: FilterProfile::mcq(),
            identifier_filter_profile: FilterProfile::identifier(),
            identifier_header_crop_pct: 0.35,
            min_jump_intensity: 15.0,
            threshold_fallback_offset: 5.0,
            row_tolerance_px: 20,
            column_drop_side: DropSide::Leftmost,
            separator_binarization: Binarization::Adaptive {
                block_radius: 10,
                offset: 5.0,
            },
            horizontal_separator_fallback_pct: 0.22,
            horizontal_separator_min_width_pct: 0.8,
            horizontal_separator_max_height_px: 20,
            vertical_separator_kernel_height: 40,
            vertical_separator_min_height_pct: 0.5,
            vertical_separator_max_width_px: 25,
            vertical_separator_cluster_tolerance_px: 20,
        }
    }
}

impl SheetConfig {
    /// Reads and validates a configuration file. Every field must be
    /// present.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Unreadable(path.to_path_buf(), e))?;
        Self::from_json_str(&json)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SheetConfig = serde_json::from_str(json).map_err(ConfigError::Malformed)?;
        config.validate()?;
        Ok(config)
    }

    pub fn total_questions(&self) -> usize {
        self.num_answer_blocks * self.questions_per_block
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_answer_blocks == 0 {
            return Err(ConfigError::invalid("numAnswerBlocks", "must be at least 1"));
        }
        if self.questions_per_block == 0 {
            return Err(ConfigError::invalid("questionsPerBlock", "must be at least 1"));
        }
        if self.identifier_digit_count == 0 {
            return Err(ConfigError::invalid(
                "identifierDigitCount",
                "must be at least 1",
            ));
        }

        let markers = &self.markers;
        if !(markers.blur_sigma > 0.0) {
            return Err(ConfigError::invalid("markers.blurSigma", "must be positive"));
        }
        if !(markers.min_aspect > 0.0 && markers.min_aspect <= markers.max_aspect) {
            return Err(ConfigError::invalid("markers", "aspect limits are empty"));
        }
        if !(markers.min_area >= 0.0 && markers.min_area < markers.max_area) {
            return Err(ConfigError::invalid("markers", "area limits are empty"));
        }

        let margins = &self.margins;
        for (field, value) in [
            ("margins.top", margins.top),
            ("margins.bottom", margins.bottom),
            ("margins.left", margins.left),
            ("margins.right", margins.right),
        ] {
            validate_fraction(field, value)?;
        }
        if margins.top + margins.bottom >= 1.0 || margins.left + margins.right >= 1.0 {
            return Err(ConfigError::invalid("margins", "margins cover the whole sheet"));
        }

        self.mcq_filter_profile.validate("mcqFilterProfile")?;
        self.identifier_filter_profile
            .validate("identifierFilterProfile")?;
        validate_binarization(&self.separator_binarization, "separatorBinarization")?;

        validate_fraction("identifierHeaderCropPct", self.identifier_header_crop_pct)?;
        validate_fraction(
            "horizontalSeparatorFallbackPct",
            self.horizontal_separator_fallback_pct,
        )?;
        validate_fraction(
            "horizontalSeparatorMinWidthPct",
            self.horizontal_separator_min_width_pct,
        )?;
        validate_fraction(
            "verticalSeparatorMinHeightPct",
            self.vertical_separator_min_height_pct,
        )?;

        if !(self.min_jump_intensity >= 0.0) {
            return Err(ConfigError::invalid(
                "minJumpIntensity",
                "must not be negative",
            ));
        }
        if !(self.threshold_fallback_offset >= 0.0) {
            return Err(ConfigError::invalid(
                "thresholdFallbackOffset",
                "must not be negative",
            ));
        }
        if self.row_tolerance_px <= 0 {
            return Err(ConfigError::invalid("rowTolerancePx", "must be positive"));
        }
        if self.vertical_separator_kernel_height == 0 {
            return Err(ConfigError::invalid(
                "verticalSeparatorKernelHeight",
                "must be positive",
            ));
        }
        Ok(())
    }
}

fn validate_fraction(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..1.0).contains(&value) {
        return Err(ConfigError::invalid(field, "must be in [0, 1)"));
    }
    Ok(())
}

fn validate_binarization(binarization: &Binarization, field: &'static str) -> Result<(), ConfigError> {
    match binarization {
        Binarization::Adaptive { block_radius, .. } if *block_radius == 0 => {
            Err(ConfigError::invalid(field, "adaptive blockRadius must be positive"))
        }
        _ => Ok(()),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Unreadable(PathBuf, std::io::Error),
    Malformed(serde_json::Error),
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: &str) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.to_string(),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Unreadable(path, e) => {
                write!(f, "cannot read config {}: {}", path.display(), e)
            }
            ConfigError::Malformed(e) => write!(f, "malformed config: {}", e),
            ConfigError::Invalid { field, reason } => {
                write!(f, "invalid config field {}: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SheetConfig::default().validate().is_ok());
        assert_eq!(SheetConfig::default().total_questions(), 60);
    }

    #[test]
    fn serialized_default_loads_back() {
        let json = serde_json::to_string_pretty(&SheetConfig::default()).unwrap();
        let config = SheetConfig::from_json_str(&json).unwrap();
        assert_eq!(config, SheetConfig::default());
    }

    #[test]
    fn missing_key_is_rejected() {
        let mut value = serde_json::to_value(SheetConfig::default()).unwrap();
        value.as_object_mut().unwrap().remove("rowTolerancePx");
        let err = SheetConfig::from_json_str(&value.to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)), "{}", err);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let mut value = serde_json::to_value(SheetConfig::default()).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("rowTolerance".to_string(), serde_json::json!(10));
        assert!(matches!(
            SheetConfig::from_json_str(&value.to_string()),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn out_of_range_values_fail_validation() {
        let config = SheetConfig {
            num_answer_blocks: 0,
            ..SheetConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "numAnswerBlocks",
                ..
            })
        ));

        let config = SheetConfig {
            horizontal_separator_fallback_pct: 1.5,
            ..SheetConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = SheetConfig::default();
        config.mcq_filter_profile.min_width = 70;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "mcqFilterProfile",
                ..
            })
        ));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.json");
        let config = SheetConfig {
            column_drop_side: DropSide::Rightmost,
            ..SheetConfig::default()
        };
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(SheetConfig::load(&path).unwrap(), config);
        assert!(matches!(
            SheetConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::Unreadable(..))
        ));
    }

    #[test]
    fn profiles_use_exclusive_size_limits() {
        let profile = FilterProfile::identifier();
        assert!(profile.accepts(&Rect::at(0, 0).of_size(20, 20)));
        assert!(!profile.accepts(&Rect::at(0, 0).of_size(15, 15)));
        assert!(!profile.accepts(&Rect::at(0, 0).of_size(20, 40)));
        assert!(FilterProfile::mcq().accepts(&Rect::at(0, 0).of_size(40, 10)));
    }
}
