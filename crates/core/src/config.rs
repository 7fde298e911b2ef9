//! Runtime configuration.
//!
//! [`RendererConfig`] holds the knobs the app and renderer read at startup.
//! Defaults suit a development run; `HORIZON_*` environment variables
//! override individual fields.
//!
//! | variable | field | example |
//! |---|---|---|
//! | `HORIZON_WIDTH` | `window_width` | `1280` |
//! | `HORIZON_HEIGHT` | `window_height` | `720` |
//! | `HORIZON_TITLE` | `window_title` | `Horizon` |
//! | `HORIZON_SHADER_DIR` | `shader_dir` | `shaders` |
//! | `HORIZON_FRAMES_IN_FLIGHT` | `frames_in_flight` | `2` |
//! | `HORIZON_WORKGROUP` | `workgroup_size` | `8x8` |
//! | `HORIZON_STORAGE_FORMAT` | `storage_format` | `rgba32f` |
//! | `HORIZON_OVERLAY` | `overlay_visible` | `true` |
//! | `HORIZON_VALIDATION` | `enable_validation` | `0` |

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Largest supported number of frames in flight.
pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 3;

/// Startup configuration for the renderer and its window.
#[derive(Clone, Debug, PartialEq)]
pub struct RendererConfig {
    pub window_width: u32,
    pub window_height: u32,
    pub window_title: String,
    /// Directory holding the compiled `.spv` files.
    pub shader_dir: PathBuf,
    /// Frame slots recorded ahead of the GPU, `1..=3`.
    pub frames_in_flight: usize,
    /// Compute local size (x, y); must match the shaders.
    pub workgroup_size: (u32, u32),
    /// Storage image format name (`rgba32f`, `rgba16f`, `rgba8`).
    pub storage_format: String,
    pub overlay_visible: bool,
    pub enable_validation: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window_width: 800,
            window_height: 600,
            window_title: "Horizon".to_string(),
            shader_dir: PathBuf::from("shaders"),
            frames_in_flight: 2,
            workgroup_size: (8, 8),
            storage_format: "rgba32f".to_string(),
            overlay_visible: true,
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl RendererConfig {
    /// Defaults overridden by `HORIZON_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is malformed or the result
    /// fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("HORIZON_WIDTH") {
            config.window_width = parse_number("HORIZON_WIDTH", &v)?;
        }
        if let Some(v) = lookup("HORIZON_HEIGHT") {
            config.window_height = parse_number("HORIZON_HEIGHT", &v)?;
        }
        if let Some(v) = lookup("HORIZON_TITLE") {
            config.window_title = v;
        }
        if let Some(v) = lookup("HORIZON_SHADER_DIR") {
            config.shader_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("HORIZON_FRAMES_IN_FLIGHT") {
            config.frames_in_flight = parse_number("HORIZON_FRAMES_IN_FLIGHT", &v)?;
        }
        if let Some(v) = lookup("HORIZON_WORKGROUP") {
            config.workgroup_size = parse_pair("HORIZON_WORKGROUP", &v)?;
        }
        if let Some(v) = lookup("HORIZON_STORAGE_FORMAT") {
            config.storage_format = v.trim().to_ascii_lowercase();
        }
        if let Some(v) = lookup("HORIZON_OVERLAY") {
            config.overlay_visible = parse_flag("HORIZON_OVERLAY", &v)?;
        }
        if let Some(v) = lookup("HORIZON_VALIDATION") {
            config.enable_validation = parse_flag("HORIZON_VALIDATION", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks sizes and limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.window_width == 0 || self.window_height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window_width, self.window_height
            )));
        }
        if !(1..=MAX_FRAMES_IN_FLIGHT_LIMIT).contains(&self.frames_in_flight) {
            return Err(Error::Config(format!(
                "frames_in_flight must be between 1 and {}, got {}",
                MAX_FRAMES_IN_FLIGHT_LIMIT, self.frames_in_flight
            )));
        }
        if self.workgroup_size.0 == 0 || self.workgroup_size.1 == 0 {
            return Err(Error::Config(format!(
                "workgroup size must be non-zero, got {}x{}",
                self.workgroup_size.0, self.workgroup_size.1
            )));
        }
        if self.storage_format.is_empty() {
            return Err(Error::Config("storage_format is empty".to_string()));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: expected a number, got '{value}'")))
}

fn parse_pair(key: &str, value: &str) -> Result<(u32, u32)> {
    let (x, y) = value
        .split_once(['x', 'X', ','])
        .ok_or_else(|| Error::Config(format!("{key}: expected 'XxY', got '{value}'")))?;
    Ok((parse_number(key, x)?, parse_number(key, y)?))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{key}: expected a boolean, got '{value}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_default_config() {
        let config = RendererConfig::default();
        assert_eq!(config.window_width, 800);
        assert_eq!(config.window_height, 600);
        assert_eq!(config.window_title, "Horizon");
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.workgroup_size, (8, 8));
        assert_eq!(config.storage_format, "rgba32f");
        assert!(config.overlay_visible);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_no_variables_gives_defaults() {
        let config = RendererConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RendererConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = RendererConfig::from_lookup(lookup(&[
            ("HORIZON_WIDTH", "1920"),
            ("HORIZON_HEIGHT", " 1080 "),
            ("HORIZON_FRAMES_IN_FLIGHT", "3"),
            ("HORIZON_WORKGROUP", "16x4"),
            ("HORIZON_STORAGE_FORMAT", "RGBA16F"),
            ("HORIZON_OVERLAY", "off"),
            ("HORIZON_VALIDATION", "1"),
            ("HORIZON_SHADER_DIR", "/opt/horizon/spv"),
        ]))
        .unwrap();
        assert_eq!(config.window_width, 1920);
        assert_eq!(config.window_height, 1080);
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.workgroup_size, (16, 4));
        assert_eq!(config.storage_format, "rgba16f");
        assert!(!config.overlay_visible);
        assert!(config.enable_validation);
        assert_eq!(config.shader_dir, PathBuf::from("/opt/horizon/spv"));
    }

    #[test]
    fn test_malformed_values_rejected() {
        for vars in [
            [("HORIZON_WIDTH", "wide")],
            [("HORIZON_WORKGROUP", "8")],
            [("HORIZON_WORKGROUP", "8xeight")],
            [("HORIZON_OVERLAY", "maybe")],
        ] {
            let err = RendererConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{vars:?}");
        }
    }

    #[test]
    fn test_validate_limits() {
        let mut config = RendererConfig::default();
        config.frames_in_flight = 0;
        assert!(config.validate().is_err());
        config.frames_in_flight = MAX_FRAMES_IN_FLIGHT_LIMIT + 1;
        assert!(config.validate().is_err());
        config.frames_in_flight = 1;
        assert!(config.validate().is_ok());

        config.window_height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_frames_from_env() {
        let err =
            RendererConfig::from_lookup(lookup(&[("HORIZON_FRAMES_IN_FLIGHT", "4")])).unwrap_err();
        assert!(err.to_string().contains("frames_in_flight"));
    }
}
