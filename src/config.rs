use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "RuntimeConfig::default_assembly_path")]
    pub assembly_path: PathBuf,
    #[serde(default)]
    pub library_path: Option<PathBuf>,
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HandlePoolConfig {
    #[serde(default = "HandlePoolConfig::default_high_water_mark")]
    pub high_water_mark: usize,
    #[serde(default = "HandlePoolConfig::default_hard_cap")]
    pub hard_cap: usize,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HotReloadConfig {
    #[serde(default = "HotReloadConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "HotReloadConfig::default_poll_interval")]
    pub poll_interval_secs: f32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GcConfig {
    #[serde(default = "GcConfig::default_interval")]
    pub interval_secs: f32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LogicConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub handles: HandlePoolConfig,
    #[serde(default)]
    pub hot_reload: HotReloadConfig,
    #[serde(default)]
    pub gc: GcConfig,
}

#[derive(Debug, Clone, Default)]
pub struct LogicConfigOverrides {
    pub assembly_path: Option<PathBuf>,
    pub library_path: Option<PathBuf>,
    pub verbose: Option<bool>,
    pub hot_reload: Option<bool>,
}

impl RuntimeConfig {
    fn default_assembly_path() -> PathBuf {
        PathBuf::from("assets/scripts")
    }

    pub fn with_assembly(path: impl Into<PathBuf>) -> Self {
        Self { assembly_path: path.into(), ..Self::default() }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { assembly_path: Self::default_assembly_path(), library_path: None, verbose: false }
    }
}

impl HandlePoolConfig {
    const fn default_high_water_mark() -> usize {
        4_096
    }

    const fn default_hard_cap() -> usize {
        8_192
    }
}

impl Default for HandlePoolConfig {
    fn default() -> Self {
        Self { high_water_mark: Self::default_high_water_mark(), hard_cap: Self::default_hard_cap() }
    }
}

impl HotReloadConfig {
    const fn default_enabled() -> bool {
        true
    }

    const fn default_poll_interval() -> f32 {
        1.0
    }
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self { enabled: Self::default_enabled(), poll_interval_secs: Self::default_poll_interval() }
    }
}

impl GcConfig {
    const fn default_interval() -> f32 {
        5.0
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self { interval_secs: Self::default_interval() }
    }
}

impl LogicConfig {
    pub fn with_assembly(path: impl Into<PathBuf>) -> Self {
        Self { runtime: RuntimeConfig::with_assembly(path), ..Self::default() }
    }

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
                log::warn!("[config] load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &LogicConfigOverrides) {
        if let Some(path) = &overrides.assembly_path {
            self.runtime.assembly_path = path.clone();
        }
        if let Some(path) = &overrides.library_path {
            self.runtime.library_path = Some(path.clone());
        }
        if let Some(verbose) = overrides.verbose {
            self.runtime.verbose = verbose;
        }
        if let Some(enabled) = overrides.hot_reload {
            self.hot_reload.enabled = enabled;
        }
    }
}

impl LogicConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.assembly_path.is_none()
            && self.library_path.is_none()
            && self.verbose.is_none()
            && self.hot_reload.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.assembly_path.is_some() {
            fields.push("assembly_path");
        }
        if self.library_path.is_some() {
            fields.push("library_path");
        }
        if self.verbose.is_some() {
            fields.push("verbose");
        }
        if self.hot_reload.is_some() {
            fields.push("hot_reload");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: LogicConfig = serde_json::from_str("{}").expect("parse empty config");
        assert_eq!(cfg.runtime.assembly_path, PathBuf::from("assets/scripts"));
        assert!(cfg.runtime.library_path.is_none());
        assert_eq!(cfg.handles.high_water_mark, 4_096);
        assert_eq!(cfg.handles.hard_cap, 8_192);
        assert!(cfg.hot_reload.enabled);
        assert_eq!(cfg.gc.interval_secs, 5.0);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let cfg: LogicConfig = serde_json::from_str(
            r#"{ "runtime": { "assembly_path": "game/scripts", "verbose": true }, "handles": { "hard_cap": 16 } }"#,
        )
        .expect("parse config");
        assert_eq!(cfg.runtime.assembly_path, PathBuf::from("game/scripts"));
        assert!(cfg.runtime.verbose);
        assert_eq!(cfg.handles.hard_cap, 16);
        assert_eq!(cfg.handles.high_water_mark, 4_096);
    }

    #[test]
    fn overrides_replace_selected_fields() {
        let mut cfg = LogicConfig::default();
        let overrides = LogicConfigOverrides {
            assembly_path: Some(PathBuf::from("other")),
            hot_reload: Some(false),
            ..Default::default()
        };
        assert!(!overrides.is_empty());
        cfg.apply_overrides(&overrides);
        assert_eq!(cfg.runtime.assembly_path, PathBuf::from("other"));
        assert!(!cfg.hot_reload.enabled);
        assert_eq!(overrides.applied_fields(), vec!["assembly_path", "hot_reload"]);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = LogicConfig::load_or_default("does/not/exist.json");
        assert_eq!(cfg.gc.interval_secs, 5.0);
    }
}
