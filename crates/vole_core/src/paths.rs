//! Session folder layout and previous-session discovery.
//!
//! Sessions live at `<data_root>/<subject>/<YYYY-MM-DD>/<NNN>/`, with the
//! raw behavioral files under `raw_behavior_data/`. The previous session's
//! data file (if any) feeds the adaptive reward/gain rules.

use crate::error::CoreError;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const RAW_DATA_DIR: &str = "raw_behavior_data";
pub const SETTINGS_FILE: &str = "_vole_taskSettings.raw.json";
pub const DATA_FILE: &str = "_vole_taskData.raw.jsonl";
pub const AMBIENT_FILE: &str = "_vole_ambientSensorData.raw.jsonl";
pub const CODE_ARCHIVE: &str = "_vole_codeFiles.raw.zip";
pub const SESSION_LOG: &str = "_vole_session.log";

const MAX_SESSIONS_PER_DAY: u32 = 999;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPaths {
    pub subject: String,
    pub protocol: String,
    pub date: NaiveDate,
    pub number: u32,
    pub session_folder: PathBuf,
    pub raw_data_folder: PathBuf,
    pub settings_file: PathBuf,
    pub data_file: PathBuf,
    pub ambient_file: PathBuf,
    pub code_archive: PathBuf,
    /// Data file of the most recent earlier session for this subject, if one
    /// exists and actually recorded trials.
    pub previous_data_file: Option<PathBuf>,
}

impl SessionPaths {
    /// Create today's next session folder for `subject` and return the full
    /// path set.
    pub fn create(data_root: &Path, subject: &str, protocol: &str) -> Result<Self, CoreError> {
        Self::create_for_date(data_root, subject, protocol, Utc::now().date_naive())
    }

    pub fn create_for_date(
        data_root: &Path,
        subject: &str,
        protocol: &str,
        date: NaiveDate,
    ) -> Result<Self, CoreError> {
        let date_dir = data_root.join(subject).join(date.to_string());
        let number = next_session_number(&date_dir, subject, &date)?;
        let session_folder = date_dir.join(format!("{number:03}"));
        let raw_data_folder = session_folder.join(RAW_DATA_DIR);
        std::fs::create_dir_all(&raw_data_folder)?;

        let previous_data_file = find_previous_data_file(data_root, subject, date, number);
        if let Some(prev) = &previous_data_file {
            tracing::info!("Previous session found: {}", prev.display());
        } else {
            tracing::info!("No previous session for {subject}");
        }

        Ok(Self {
            subject: subject.to_string(),
            protocol: protocol.to_string(),
            date,
            number,
            settings_file: raw_data_folder.join(SETTINGS_FILE),
            data_file: raw_data_folder.join(DATA_FILE),
            ambient_file: raw_data_folder.join(AMBIENT_FILE),
            code_archive: raw_data_folder.join(CODE_ARCHIVE),
            session_folder,
            raw_data_folder,
            previous_data_file,
        })
    }

    /// Most recent data file for a subject without creating anything — used
    /// by `vole info`.
    pub fn latest_data_file(data_root: &Path, subject: &str) -> Option<PathBuf> {
        // (date, number) strictly after anything real, so every session is
        // "previous" to it.
        find_previous_data_file(data_root, subject, NaiveDate::MAX, 0)
    }
}

fn next_session_number(
    date_dir: &Path,
    subject: &str,
    date: &NaiveDate,
) -> Result<u32, CoreError> {
    for number in 1..=MAX_SESSIONS_PER_DAY {
        if !date_dir.join(format!("{number:03}")).exists() {
            return Ok(number);
        }
    }
    Err(CoreError::SessionNumberExhausted {
        subject: subject.to_string(),
        date: date.to_string(),
    })
}

/// Scan the subject's tree for the latest `(date, number)` strictly before
/// `(date, number)` whose raw folder contains a data file. Sessions that
/// crashed before the first trial leave a folder with no data file and are
/// skipped.
fn find_previous_data_file(
    data_root: &Path,
    subject: &str,
    date: NaiveDate,
    number: u32,
) -> Option<PathBuf> {
    let subject_dir = data_root.join(subject);
    let mut sessions: Vec<(NaiveDate, u32, PathBuf)> = Vec::new();

    let date_entries = std::fs::read_dir(&subject_dir).ok()?;
    for date_entry in date_entries.flatten() {
        let Ok(session_date) = date_entry.file_name().to_string_lossy().parse::<NaiveDate>()
        else {
            continue;
        };
        let Ok(num_entries) = std::fs::read_dir(date_entry.path()) else {
            continue;
        };
        for num_entry in num_entries.flatten() {
            let Ok(session_num) = num_entry.file_name().to_string_lossy().parse::<u32>() else {
                continue;
            };
            if (session_date, session_num) >= (date, number) {
                continue;
            }
            let data_file = num_entry.path().join(RAW_DATA_DIR).join(DATA_FILE);
            if data_file.is_file() {
                sessions.push((session_date, session_num, data_file));
            }
        }
    }

    sessions.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    sessions.pop().map(|(_, _, path)| path)
}
