use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::meta_model::MetaModels;
use crate::thresholds::ThresholdTable;
use crate::training::{ModelSet, TrainReport};

pub const MODELS_FILE: &str = "models.json";
pub const META_FILE: &str = "meta_models.json";
pub const THRESHOLDS_FILE: &str = "thresholds.json";
pub const REPORT_FILE: &str = "train_report.json";

pub const ARTIFACT_VERSION: u32 = 1;

pub fn default_artifact_dir() -> PathBuf {
    std::env::var_os("MATCHEDGE_ARTIFACTS")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("artifacts"))
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    saved_at: String,
    payload: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    version: u32,
    saved_at: String,
    payload: T,
}

/// Serializes through a sibling tmp file and renames into place, so a
/// crash mid-write never leaves a truncated artifact.
fn save_json<T: Serialize>(dir: &Path, file: &str, payload: &T) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("create artifact dir {}", dir.display()))?;
    let envelope = EnvelopeRef {
        version: ARTIFACT_VERSION,
        saved_at: Utc::now().to_rfc3339(),
        payload,
    };
    let json = serde_json::to_string(&envelope).with_context(|| format!("encode {file}"))?;
    let path = dir.join(file);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, &path)
        .with_context(|| format!("rename {} into place", tmp.display()))?;
    Ok(path)
}

fn load_json<T: DeserializeOwned>(dir: &Path, file: &str) -> Result<T> {
    let path = dir.join(file);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("read artifact {}", path.display()))?;
    let envelope: Envelope<T> =
        serde_json::from_str(&raw).with_context(|| format!("decode artifact {file}"))?;
    if envelope.version != ARTIFACT_VERSION {
        anyhow::bail!(
            "artifact {file} has version {}, expected {ARTIFACT_VERSION}; retrain",
            envelope.version
        );
    }
    log::debug!("loaded {file} saved at {}", envelope.saved_at);
    Ok(envelope.payload)
}

pub fn save_models(dir: &Path, models: &ModelSet) -> Result<PathBuf> {
    save_json(dir, MODELS_FILE, models)
}

pub fn load_models(dir: &Path) -> Result<ModelSet> {
    load_json(dir, MODELS_FILE)
}

pub fn save_meta_models(dir: &Path, meta: &MetaModels) -> Result<PathBuf> {
    save_json(dir, META_FILE, meta)
}

pub fn load_meta_models(dir: &Path) -> Result<MetaModels> {
    load_json(dir, META_FILE)
}

pub fn save_thresholds(dir: &Path, table: &ThresholdTable) -> Result<PathBuf> {
    save_json(dir, THRESHOLDS_FILE, table)
}

/// Loads the threshold table, hydrating any missing tier/market cells
/// with market defaults. A missing file is not an error; callers get a
/// fully defaulted table and a warning instead.
pub fn load_thresholds(dir: &Path) -> Result<ThresholdTable> {
    let path = dir.join(THRESHOLDS_FILE);
    if !path.exists() {
        log::warn!(
            "no threshold artifact at {}, using market defaults",
            path.display()
        );
        let mut table = ThresholdTable::default();
        table.hydrate();
        return Ok(table);
    }
    let mut table: ThresholdTable = load_json(dir, THRESHOLDS_FILE)?;
    table.hydrate();
    Ok(table)
}

pub fn save_report(dir: &Path, report: &TrainReport) -> Result<PathBuf> {
    save_json(dir, REPORT_FILE, report)
}

pub fn load_report(dir: &Path) -> Result<TrainReport> {
    load_json(dir, REPORT_FILE)
}
