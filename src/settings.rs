use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::capture::DetectorConfig;
use crate::game::StageControllerConfig;
use crate::sensing::{feed::DEFAULT_HISTORY_LEN, SamplerConfig};

const DEBUG_ENV: &str = "STAGEMOOD_DEBUG";
const DEBUG_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SamplerSettings {
    pub interval_ms: u64,
    pub warmup_ms: u64,
    pub camera_timeout_ms: u64,
    pub inference_timeout_ms: u64,
    pub detector_input_size: u32,
    pub score_threshold: f32,
    pub history_len: usize,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            warmup_ms: 1_000,
            camera_timeout_ms: 5_000,
            inference_timeout_ms: 10_000,
            detector_input_size: 416,
            score_threshold: 0.5,
            history_len: DEFAULT_HISTORY_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageSettings {
    pub sqlite_enabled: bool,
    pub sqlite_path: PathBuf,
    pub jsonl_enabled: bool,
    pub jsonl_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            sqlite_enabled: true,
            sqlite_path: PathBuf::from("stagemood.db"),
            jsonl_enabled: true,
            jsonl_path: PathBuf::from("stagemood-journal.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppSettings {
    pub sampler: SamplerSettings,
    pub storage: StorageSettings,
}

impl AppSettings {
    /// Controller timings. In debug mode samples come every second.
    pub fn controller_config(&self, debug_mode: bool) -> StageControllerConfig {
        let sampler = &self.sampler;
        let interval_ms = if debug_mode {
            DEBUG_INTERVAL_MS
        } else {
            sampler.interval_ms
        };

        StageControllerConfig {
            sampler: SamplerConfig {
                interval: Duration::from_millis(interval_ms),
                warmup: Duration::from_millis(sampler.warmup_ms),
                inference_timeout: Duration::from_millis(sampler.inference_timeout_ms),
                detector: DetectorConfig {
                    input_size: sampler.detector_input_size,
                    score_threshold: sampler.score_threshold,
                },
                history_len: sampler.history_len,
            },
            camera_timeout: Duration::from_millis(sampler.camera_timeout_ms),
        }
    }
}

pub fn debug_mode_from_env() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AppSettings>,
}

impl SettingsStore {
    /// Open the settings file. Missing or malformed files fall back to defaults.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            AppSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, AppSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, AppSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self) -> AppSettings {
        self.read().clone()
    }

    pub fn sampler(&self) -> SamplerSettings {
        self.read().sampler.clone()
    }

    pub fn storage(&self) -> StorageSettings {
        self.read().storage.clone()
    }

    pub fn update_sampler(&self, settings: SamplerSettings) -> Result<()> {
        let mut guard = self.write();
        guard.sampler = settings;
        self.persist(&guard)
    }

    pub fn update_storage(&self, settings: StorageSettings) -> Result<()> {
        let mut guard = self.write();
        guard.storage = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &AppSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: AppSettings = serde_json::from_str(&contents)?;
        *self.write() = data;
        Ok(())
    }
}
