//! Configuration loader - YAML settings + .env overrides

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::flight_paths::{FlightPathSettings, DEFAULT_TIME_JUMP_THRESHOLD};
use crate::routes::{Rgb, RouteTunables};

/// Main configuration loaded from globe.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub globe: GlobeConfig,
    /// Defaults for routes without their own tunables
    pub tunables: RouteTunables,
    pub animation: AnimationConfig,
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobeConfig {
    pub radius: f64,
    /// Camera orbit speed in radians per second
    pub rotation_speed: f32,
    pub color: Rgb,
    pub background: Rgb,
    /// Display scale applied to marker glyphs
    pub marker_scale: f32,
}

impl Default for GlobeConfig {
    fn default() -> Self {
        Self {
            radius: 2.0,
            rotation_speed: 0.1,
            color: Rgb::new(0x0b, 0x1d, 0x3a),
            background: Rgb::new(0x00, 0x00, 0x11),
            marker_scale: 4.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Seconds between frames after which trails are reset
    pub time_jump_threshold: f64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            time_jump_threshold: DEFAULT_TIME_JUMP_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Flight Globe".to_string(),
            width: 1200,
            height: 800,
        }
    }
}

/// Overrides loaded from .env / the process environment
#[derive(Debug, Clone)]
pub struct Environment {
    pub routes_file: Option<PathBuf>,
    pub log_dir: String,
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.globe.radius.is_finite() && self.globe.radius > 0.0) {
            bail!("globe.radius must be a positive number, got {}", self.globe.radius);
        }
        if !(self.animation.time_jump_threshold > 0.0) {
            bail!(
                "animation.time_jump_threshold must be positive, got {}",
                self.animation.time_jump_threshold
            );
        }
        if !(self.globe.marker_scale > 0.0) {
            bail!("globe.marker_scale must be positive, got {}", self.globe.marker_scale);
        }
        self.tunables.validate().context("tunables")?;
        Ok(())
    }

    /// Settings for the flight-path set
    pub fn flight_path_settings(&self) -> FlightPathSettings {
        FlightPathSettings {
            globe_radius: self.globe.radius,
            tunables: self.tunables,
            time_jump_threshold: self.animation.time_jump_threshold,
        }
    }
}

impl Environment {
    /// Load overrides from .env file
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        Environment {
            routes_file: std::env::var("FLIGHT_GLOBE_ROUTES").ok().map(PathBuf::from),
            log_dir: std::env::var("FLIGHT_GLOBE_LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
        }
    }
}
