use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "CameraConfig::default_position")]
    pub position: [f32; 3],
    #[serde(default)]
    pub target: [f32; 3],
    #[serde(default = "CameraConfig::default_fov")]
    pub fov_y_degrees: f32,
    #[serde(default = "CameraConfig::default_near")]
    pub near: f32,
    #[serde(default = "CameraConfig::default_far")]
    pub far: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnimationConfig {
    /// Length of the linear cross-fade between clips.
    #[serde(default = "AnimationConfig::default_fade_seconds")]
    pub fade_seconds: f32,
    #[serde(default = "AnimationConfig::default_speed")]
    pub default_speed: f32,
    #[serde(default = "AnimationConfig::default_true")]
    pub default_loop: bool,
    #[serde(default = "AnimationConfig::default_true")]
    pub default_playing: bool,
    #[serde(default = "AnimationConfig::default_min_speed")]
    pub min_speed: f32,
    #[serde(default = "AnimationConfig::default_max_speed")]
    pub max_speed: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlacementConfig {
    #[serde(default)]
    pub ground_height: f32,
    #[serde(default = "PlacementConfig::default_trigger_radius")]
    pub default_trigger_radius: f32,
    #[serde(default = "PlacementConfig::default_animation_key")]
    pub default_animation_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "SyncConfig::default_queue_depth")]
    pub worker_queue_depth: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StageConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub animation: AnimationConfig,
    #[serde(default)]
    pub placement: PlacementConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Default)]
pub struct StageConfigOverrides {
    pub fade_seconds: Option<f32>,
    pub fov_y_degrees: Option<f32>,
}

impl CameraConfig {
    const fn default_position() -> [f32; 3] {
        [8.0, 8.0, 8.0]
    }

    const fn default_fov() -> f32 {
        60.0
    }

    const fn default_near() -> f32 {
        0.1
    }

    const fn default_far() -> f32 {
        1000.0
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: Self::default_position(),
            target: [0.0; 3],
            fov_y_degrees: Self::default_fov(),
            near: Self::default_near(),
            far: Self::default_far(),
        }
    }
}

impl AnimationConfig {
    const fn default_fade_seconds() -> f32 {
        0.2
    }

    const fn default_speed() -> f32 {
        1.0
    }

    const fn default_true() -> bool {
        true
    }

    const fn default_min_speed() -> f32 {
        0.1
    }

    const fn default_max_speed() -> f32 {
        3.0
    }

    /// Clamps a requested playback speed into the panel range; non-finite or non-positive input is rejected.
    pub fn clamp_speed(&self, speed: f32) -> Option<f32> {
        if !speed.is_finite() || speed <= 0.0 {
            return None;
        }
        Some(speed.clamp(self.min_speed.max(f32::EPSILON), self.max_speed.max(self.min_speed)))
    }
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            fade_seconds: Self::default_fade_seconds(),
            default_speed: Self::default_speed(),
            default_loop: Self::default_true(),
            default_playing: Self::default_true(),
            min_speed: Self::default_min_speed(),
            max_speed: Self::default_max_speed(),
        }
    }
}

impl PlacementConfig {
    const fn default_trigger_radius() -> f32 {
        crate::model::DEFAULT_TRIGGER_RADIUS
    }

    fn default_animation_key() -> String {
        crate::model::DEFAULT_ANIMATION_KEY.to_string()
    }
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            ground_height: 0.0,
            default_trigger_radius: Self::default_trigger_radius(),
            default_animation_key: Self::default_animation_key(),
        }
    }
}

impl SyncConfig {
    const fn default_queue_depth() -> usize {
        256
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { worker_queue_depth: Self::default_queue_depth() }
    }
}

impl StageConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!(target: "session", "Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &StageConfigOverrides) {
        if let Some(fade) = overrides.fade_seconds {
            self.animation.fade_seconds = fade.max(0.0);
        }
        if let Some(fov) = overrides.fov_y_degrees {
            self.camera.fov_y_degrees = fov;
        }
    }
}

impl StageConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.fade_seconds.is_none() && self.fov_y_degrees.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.fade_seconds.is_some() {
            fields.push("fade_seconds");
        }
        if self.fov_y_degrees.is_some() {
            fields.push("fov_y_degrees");
        }
        fields
    }
}
