use crate::config::{ConfigOverrides, ShadowCascades};
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CliOverrides {
    config: Option<PathBuf>,
    scene: Option<PathBuf>,
    shadow_map_size: Option<u32>,
    cascades: Option<ShadowCascades>,
    distance: Option<f32>,
    gpu: bool,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            if !flag.starts_with("--") {
                bail!("Unexpected argument '{flag}'. Flags take the form --name value.");
            }
            let key = &flag[2..];
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => overrides.config = Some(PathBuf::from(value)),
                "scene" => overrides.scene = Some(PathBuf::from(value)),
                "shadow-map-size" => {
                    overrides.shadow_map_size = Some(
                        value.parse::<u32>().with_context(|| format!("Invalid shadow map size '{value}'"))?,
                    );
                }
                "cascades" => {
                    let count = value.parse::<u32>().with_context(|| format!("Invalid cascade count '{value}'"))?;
                    overrides.cascades = Some(
                        ShadowCascades::from_count(count)
                            .ok_or_else(|| anyhow!("Invalid cascade count {count}. Use 0, 2 or 4."))?,
                    );
                }
                "distance" => {
                    let distance =
                        value.parse::<f32>().with_context(|| format!("Invalid shadow distance '{value}'"))?;
                    if !distance.is_finite() || distance < 0.0 {
                        bail!("Shadow distance must be a non-negative number, got {distance}.");
                    }
                    overrides.distance = Some(distance);
                }
                "gpu" => overrides.gpu = parse_bool_flag(flag, &value)?,
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --config, --scene, --shadow-map-size, --cascades, --distance, --gpu."
                ),
            }
        }
        Ok(overrides)
    }

    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config.as_ref()
    }

    pub fn scene_path(&self) -> Option<&PathBuf> {
        self.scene.as_ref()
    }

    /// Render on a headless wgpu device instead of the recording backend.
    pub fn use_gpu(&self) -> bool {
        self.gpu
    }

    pub fn into_config_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            shadow_map_size: self.shadow_map_size,
            shadow_distance: self.distance,
            cascades: self.cascades,
        }
    }
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paths_and_shadow_overrides() {
        let args = [
            "shadow_report",
            "--scene",
            "scene.json",
            "--shadow-map-size",
            "2048",
            "--cascades",
            "2",
            "--distance",
            "80",
        ];
        let cli = CliOverrides::parse(args).expect("parse overrides");
        assert_eq!(cli.scene_path(), Some(&PathBuf::from("scene.json")));
        assert!(cli.config_path().is_none());
        let overrides = cli.into_config_overrides();
        assert_eq!(overrides.shadow_map_size, Some(2048));
        assert_eq!(overrides.cascades, Some(ShadowCascades::Two));
        assert_eq!(overrides.shadow_distance, Some(80.0));
    }

    #[test]
    fn latest_flag_wins() {
        let args = ["app", "--cascades", "4", "--cascades", "0"];
        let overrides = CliOverrides::parse(args).expect("parse overrides").into_config_overrides();
        assert_eq!(overrides.cascades, Some(ShadowCascades::Zero));
    }

    #[test]
    fn gpu_flag_accepts_on_off() {
        assert!(!CliOverrides::parse(["app"]).expect("parse").use_gpu());
        assert!(CliOverrides::parse(["app", "--gpu", "on"]).expect("parse").use_gpu());
        assert!(!CliOverrides::parse(["app", "--gpu", "TRUE", "--gpu", "off"]).expect("parse").use_gpu());
        let err = CliOverrides::parse(["app", "--gpu", "maybe"]).unwrap_err();
        assert!(err.to_string().contains("Use on/off"));
    }

    #[test]
    fn rejects_unsupported_cascade_counts() {
        let err = CliOverrides::parse(["app", "--cascades", "3"]).unwrap_err();
        assert!(err.to_string().contains("Use 0, 2 or 4"));
    }

    #[test]
    fn missing_value_errors() {
        let err = CliOverrides::parse(["app", "--distance"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"), "error should mention missing value");
    }

    #[test]
    fn rejects_unknown_flags() {
        let err = CliOverrides::parse(["app", "--foo", "bar"]).unwrap_err();
        assert!(err.to_string().contains("Unknown flag"), "unknown flags should error");
    }
}
