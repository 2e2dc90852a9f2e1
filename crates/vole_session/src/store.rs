//! Session persistence: the settings snapshot, the per-trial data file, and
//! the small flag files other rig machinery watches for.
//!
//! Settings documents are appended, never rewritten, so a patched or re-saved
//! session keeps its history; readers take the last document in the file.
//! Trial records are one JSON object per line.

use crate::params::SessionParams;
use anyhow::{ensure, Context, Result};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use vole_core::{SessionPaths, TrialRecord};

pub struct SessionStore {
    settings_file: PathBuf,
    data_file: PathBuf,
}

impl SessionStore {
    pub fn new(paths: &SessionPaths) -> Self {
        Self {
            settings_file: paths.settings_file.clone(),
            data_file: paths.data_file.clone(),
        }
    }

    /// Append the settings snapshot, then read it back and verify the stored
    /// document matches what we meant to write.
    pub fn save_settings(&self, params: &SessionParams) -> Result<()> {
        let doc = serde_json::to_string_pretty(params)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.settings_file)
            .with_context(|| format!("Failed to open {}", self.settings_file.display()))?;
        file.write_all(doc.as_bytes())?;
        file.write_all(b"\n")?;
        drop(file);

        let reloaded = load_settings(&self.settings_file)?;
        let written: Value = serde_json::from_str(&doc)?;
        ensure!(
            reloaded == written,
            "settings round-trip mismatch in {}",
            self.settings_file.display()
        );
        tracing::info!("session settings saved to {}", self.settings_file.display());
        Ok(())
    }

    pub fn append_trial(&self, record: &TrialRecord) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.data_file)
            .with_context(|| format!("Failed to open {}", self.data_file.display()))?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn settings_file(&self) -> &Path {
        &self.settings_file
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }
}

/// Last settings document in the file.
pub fn load_settings(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut last = None;
    for doc in serde_json::Deserializer::from_str(&content).into_iter::<Value>() {
        last = Some(doc.context("Malformed settings document")?);
    }
    last.with_context(|| format!("No settings document in {}", path.display()))
}

pub fn load_trials(path: &Path) -> Result<Vec<TrialRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).context("Malformed trial record"))
        .collect()
}

pub fn load_last_trial(path: &Path) -> Result<Option<TrialRecord>> {
    Ok(load_trials(path)?.pop())
}

/// Merge `patch`'s keys into the last settings document and rewrite the file
/// with the patched document appended.
pub fn patch_settings(path: &Path, patch: &Value) -> Result<()> {
    let mut settings = load_settings(path)?;
    let (Some(target), Some(source)) = (settings.as_object_mut(), patch.as_object()) else {
        anyhow::bail!("settings patch requires JSON objects");
    };
    for (key, value) in source {
        target.insert(key.clone(), value.clone());
    }
    let doc = serde_json::to_string_pretty(&settings)?;
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(doc.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Drop an empty `<name>.flag` marker in `folder`.
pub fn create_flag(folder: &Path, name: &str) -> Result<PathBuf> {
    let path = folder.join(format!("{name}.flag"));
    std::fs::File::create(&path)
        .with_context(|| format!("Failed to create flag {}", path.display()))?;
    tracing::debug!("flag created: {}", path.display());
    Ok(path)
}
