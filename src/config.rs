// THEORY:
// The `config` module holds the single immutable snapshot of every tunable the
// pipeline reads. A `PipelineConfig` can be built in code, or layered from a
// settings file (TOML, JSON or YAML) and `SPOT_*` environment variables.
//
// Key architectural principles:
// 1.  **Validate Once**: `validate` runs before any frame is touched. A config
//     that reaches a stage is already known to be consistent, so stages never
//     re-check ranges or radii.
// 2.  **Layered Sources**: Defaults, then the file, then the environment. Nested
//     keys use a double underscore, e.g. `SPOT_AREA__MIN_AREA=120` or
//     `SPOT_CONTRAST__CLAHE=true`.
// 3.  **Bench Defaults**: Defaults match the settings the tool was tuned with:
//     hue 0-30, saturation >= 70, value >= 50, spots larger than 50 px² and
//     10 px per mm.

use crate::core_modules::color_segmenter::{ColorClass, ColorRange};
use crate::core_modules::contrast::ContrastConfig;
use crate::core_modules::region_extractor::AreaFilter;
use crate::core_modules::spatial_grouper::validate_merge_radius;
use crate::error::{Result, SpotError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const ENV_PREFIX: &str = "SPOT";

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Range used when no color classes are configured.
    pub color_range: ColorRange,

    /// Named ranges; when non-empty, every class is segmented and reported separately
    /// and `color_range` is ignored.
    pub color_classes: Vec<ColorClass>,

    pub area: AreaFilter,

    /// Centroid distance (px) within which regions are merged into one group.
    /// `None` disables grouping.
    pub merge_radius: Option<f64>,

    /// Physical scale of the images.
    pub pixels_per_mm: f64,

    pub contrast: ContrastConfig,

    /// Strict lower area bound (px²) for manually drawn polygons.
    pub manual_min_area: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            color_range: ColorRange::default(),
            color_classes: Vec::new(),
            area: AreaFilter::default(),
            merge_radius: None,
            pixels_per_mm: 10.0,
            contrast: ContrastConfig::default(),
            manual_min_area: 10.0,
        }
    }
}

impl PipelineConfig {
    /// Layers an optional settings file (TOML, JSON, YAML… by extension) and
    /// `SPOT_*` environment variables over the defaults, then validates.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: PipelineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value against its domain. Called before any frame is touched.
    pub fn validate(&self) -> Result<()> {
        self.color_range.validate()?;

        let mut labels = HashSet::new();
        for class in &self.color_classes {
            if class.label.trim().is_empty() {
                return Err(SpotError::configuration("color_classes", "labels must not be empty"));
            }
            if !labels.insert(class.label.as_str()) {
                return Err(SpotError::configuration(
                    "color_classes",
                    format!("label `{}` is used more than once", class.label),
                ));
            }
            class.range.validate()?;
        }

        self.area.validate()?;

        if let Some(radius) = self.merge_radius {
            validate_merge_radius(radius)?;
        }

        if !(self.pixels_per_mm.is_finite() && self.pixels_per_mm > 0.0) {
            return Err(SpotError::configuration(
                "pixels_per_mm",
                format!("must be greater than 0, got {}", self.pixels_per_mm),
            ));
        }

        self.contrast.validate()?;

        if !(self.manual_min_area.is_finite() && self.manual_min_area >= 0.0) {
            return Err(SpotError::configuration(
                "manual_min_area",
                format!("must be a non-negative number, got {}", self.manual_min_area),
            ));
        }
        Ok(())
    }

    /// True when named color classes replace the single range.
    pub fn uses_color_classes(&self) -> bool {
        !self.color_classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::region_extractor::LowerBound;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.color_range, ColorRange::new(0, 30, 70, 50).unwrap());
        assert_eq!(config.area.min_area, 50.0);
        assert_eq!(config.pixels_per_mm, 10.0);
        assert!(!config.uses_color_classes());
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        let cases: Vec<Box<dyn Fn(&mut PipelineConfig)>> = vec![
            Box::new(|c| c.pixels_per_mm = 0.0),
            Box::new(|c| c.pixels_per_mm = -3.0),
            Box::new(|c| c.merge_radius = Some(-1.0)),
            Box::new(|c| c.color_range.hue_min = 40),
            Box::new(|c| c.area.max_area = Some(10.0)),
            Box::new(|c| c.contrast.brightness = 0.0),
            Box::new(|c| c.manual_min_area = f64::NAN),
            Box::new(|c| {
                c.color_classes = vec![
                    ColorClass::new("Red", ColorRange::default()),
                    ColorClass::new("Red", ColorRange::default()),
                ]
            }),
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut config = PipelineConfig::default();
            mutate(&mut config);
            let err = config.validate().expect_err(&format!("case {i} should fail"));
            assert!(matches!(err, SpotError::Configuration { .. }), "case {i}: {err:?}");
        }
    }

    #[test]
    fn settings_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
pixels_per_mm = 4.0
merge_radius = 15.0

[color_range]
hue_min = 35
hue_max = 85
sat_min = 40
val_min = 40

[area]
min_area = 120.0
max_area = 5000.0
lower_bound = "inclusive"

[contrast]
clahe = true

[[color_classes]]
label = "Green"
hue_min = 35
hue_max = 85
sat_min = 40
val_min = 40
"#
        )
        .unwrap();

        let config = PipelineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.pixels_per_mm, 4.0);
        assert_eq!(config.merge_radius, Some(15.0));
        assert_eq!(config.color_range.hue_min, 35);
        assert_eq!(config.color_range.sat_max, 255);
        assert_eq!(config.area.min_area, 120.0);
        assert_eq!(config.area.max_area, Some(5000.0));
        assert_eq!(config.area.lower_bound, LowerBound::Inclusive);
        assert!(config.contrast.clahe);
        assert_eq!(config.contrast.clahe_tile_grid, 8);
        assert_eq!(config.color_classes.len(), 1);
        assert_eq!(config.color_classes[0].label, "Green");
        assert_eq!(config.color_classes[0].range.val_max, 255);
    }

    #[test]
    fn invalid_settings_file_fails_before_processing() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "pixels_per_mm = 0.0").unwrap();
        let err = PipelineConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, SpotError::Configuration { .. }));
    }
}
