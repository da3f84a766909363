use anyhow::{Context, Result};
use glam::Vec3;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const MIN_SHADOW_MAP_SIZE: u32 = 256;
pub const MAX_SHADOW_MAP_SIZE: u32 = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShadowCascades {
    Zero,
    Two,
    #[default]
    Four,
}

impl ShadowCascades {
    pub fn count(self) -> usize {
        match self {
            ShadowCascades::Zero => 0,
            ShadowCascades::Two => 2,
            ShadowCascades::Four => 4,
        }
    }

    pub fn from_count(count: u32) -> Option<Self> {
        match count {
            0 => Some(ShadowCascades::Zero),
            2 => Some(ShadowCascades::Two),
            4 => Some(ShadowCascades::Four),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShadowConfig {
    #[serde(default = "ShadowConfig::default_map_size")]
    pub map_size: u32,
    #[serde(default = "ShadowConfig::default_distance")]
    pub distance: f32,
    #[serde(default)]
    pub cascades: ShadowCascades,
    #[serde(default = "ShadowConfig::default_two_cascades_split")]
    pub two_cascades_split: f32,
    #[serde(default = "ShadowConfig::default_four_cascades_split")]
    pub four_cascades_split: [f32; 3],
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "PipelineConfig::default_dynamic_batching")]
    pub dynamic_batching: bool,
    #[serde(default = "PipelineConfig::default_instancing")]
    pub instancing: bool,
    #[serde(default)]
    pub shadows: ShadowConfig,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub shadow_map_size: Option<u32>,
    pub shadow_distance: Option<f32>,
    pub cascades: Option<ShadowCascades>,
}

impl ShadowConfig {
    const fn default_map_size() -> u32 {
        1024
    }

    const fn default_distance() -> f32 {
        100.0
    }

    const fn default_two_cascades_split() -> f32 {
        0.25
    }

    const fn default_four_cascades_split() -> [f32; 3] {
        [0.067, 0.2, 0.467]
    }

    pub fn cascade_count(&self) -> usize {
        self.cascades.count()
    }

    /// Split ratios handed to the culler: one ratio for two cascades, three for four.
    pub fn cascade_split_ratios(&self) -> Vec3 {
        match self.cascades {
            ShadowCascades::Zero => Vec3::ZERO,
            ShadowCascades::Two => Vec3::new(self.two_cascades_split.clamp(0.0, 1.0), 0.0, 0.0),
            ShadowCascades::Four => Vec3::from_array(self.four_cascades_split).clamp(Vec3::ZERO, Vec3::ONE),
        }
    }

    /// Map size rounded to a power of two within the supported range.
    pub fn clamped_map_size(&self) -> u32 {
        self.map_size.clamp(MIN_SHADOW_MAP_SIZE, MAX_SHADOW_MAP_SIZE).next_power_of_two().min(MAX_SHADOW_MAP_SIZE)
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            map_size: Self::default_map_size(),
            distance: Self::default_distance(),
            cascades: ShadowCascades::default(),
            two_cascades_split: Self::default_two_cascades_split(),
            four_cascades_split: Self::default_four_cascades_split(),
        }
    }
}

impl PipelineConfig {
    const fn default_dynamic_batching() -> bool {
        false
    }

    const fn default_instancing() -> bool {
        true
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read pipeline config {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse pipeline config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("Pipeline config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(size) = overrides.shadow_map_size {
            self.shadows.map_size = size;
        }
        if let Some(distance) = overrides.shadow_distance {
            self.shadows.distance = distance;
        }
        if let Some(cascades) = overrides.cascades {
            self.shadows.cascades = cascades;
        }
        self.shadows.map_size = self.shadows.clamped_map_size();
        self.shadows.distance = self.shadows.distance.max(0.0);
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dynamic_batching: Self::default_dynamic_batching(),
            instancing: Self::default_instancing(),
            shadows: ShadowConfig::default(),
        }
    }
}

impl ConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.shadow_map_size.is_none() && self.shadow_distance.is_none() && self.cascades.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.shadow_map_size.is_some() {
            fields.push("shadow_map_size");
        }
        if self.shadow_distance.is_some() {
            fields.push("shadow_distance");
        }
        if self.cascades.is_some() {
            fields.push("cascades");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{ "shadows": { "map_size": 2048, "cascades": "two" } }"#).expect("parse");
        assert_eq!(cfg.shadows.map_size, 2048);
        assert_eq!(cfg.shadows.cascade_count(), 2);
        assert_eq!(cfg.shadows.distance, 100.0);
        assert!(cfg.instancing);
        assert_eq!(cfg.shadows.cascade_split_ratios(), Vec3::new(0.25, 0.0, 0.0));
    }

    #[test]
    fn load_reads_file_and_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{ "dynamic_batching": true, "shadows": {{ "distance": 40.0 }} }}"#).expect("write");
        let cfg = PipelineConfig::load(file.path()).expect("load config");
        assert!(cfg.dynamic_batching);
        assert_eq!(cfg.shadows.distance, 40.0);

        let mut broken = tempfile::NamedTempFile::new().expect("temp file");
        write!(broken, "{{ not json").expect("write");
        let err = PipelineConfig::load(broken.path()).unwrap_err();
        assert!(format!("{err:?}").contains("Failed to parse"));
        assert_eq!(PipelineConfig::load_or_default(broken.path()).shadows.map_size, 1024);
    }

    #[test]
    fn overrides_clamp_map_size() {
        let mut cfg = PipelineConfig::default();
        let overrides = ConfigOverrides {
            shadow_map_size: Some(3000),
            shadow_distance: Some(-5.0),
            cascades: Some(ShadowCascades::Zero),
        };
        cfg.apply_overrides(&overrides);
        assert_eq!(cfg.shadows.map_size, 4096);
        assert_eq!(cfg.shadows.distance, 0.0);
        assert_eq!(cfg.shadows.cascade_count(), 0);
        assert_eq!(overrides.applied_fields(), vec!["shadow_map_size", "shadow_distance", "cascades"]);

        cfg.apply_overrides(&ConfigOverrides { shadow_map_size: Some(16), ..Default::default() });
        assert_eq!(cfg.shadows.map_size, MIN_SHADOW_MAP_SIZE);
    }
}
