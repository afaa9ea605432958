//! Load raw song documents from JSON files on disk.
//!
//! Each file normally holds an array of song objects written by the
//! extraction step. Legacy key names are normalized on load (`episode` to
//! `episode_id`, `URL` to `url`). A file that is not a JSON array is treated
//! as raw model output and run through the listing parser, with the episode
//! taken from the file name.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use tracklist_core::error::{Result, TracklistError};
use tracklist_core::types::{fields, RawDocument};

use crate::episode::extract_episode_number;
use crate::listing::parse_listing;

/// All `*.json` files under `dir`, recursively, sorted by path.
pub fn find_json_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect();
    files.sort();
    debug!(dir = %dir.display(), files = files.len(), "Found JSON files");
    files
}

/// Read one file of song documents.
pub fn read_json_file(path: &Path) -> Result<Vec<RawDocument>> {
    let content = std::fs::read_to_string(path)?;

    let records = match serde_json::from_str::<Vec<RawDocument>>(&content) {
        Ok(records) => records,
        Err(json_err) => {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let episode = extract_episode_number(stem).ok_or_else(|| {
                TracklistError::Extraction(format!(
                    "{}: not a song array ({}) and no episode in file name",
                    path.display(),
                    json_err
                ))
            })?;
            debug!(path = %path.display(), episode = %episode, "Parsing file as model output");
            parse_listing(&content, &episode, None)?
        }
    };

    Ok(records.into_iter().map(normalize_record).collect())
}

/// Read and concatenate every JSON file under `dir`.
///
/// Files that cannot be read or parsed are logged and skipped. A missing
/// directory is an error.
pub fn read_and_merge_json_files(dir: &Path) -> Result<Vec<RawDocument>> {
    if !dir.is_dir() {
        return Err(TracklistError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("not a directory: {}", dir.display()),
        )));
    }

    let files = find_json_files(dir);
    let mut all = Vec::new();
    for path in &files {
        match read_json_file(path) {
            Ok(records) => {
                debug!(path = %path.display(), records = records.len(), "Read JSON file");
                all.extend(records);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping file"),
        }
    }

    info!(
        dir = %dir.display(),
        files = files.len(),
        records = all.len(),
        "Merged JSON files"
    );
    Ok(all)
}

/// Documents from a single file or from every JSON file under a directory.
pub fn load_documents(path: &Path) -> Result<Vec<RawDocument>> {
    if path.is_file() {
        read_json_file(path)
    } else {
        read_and_merge_json_files(path)
    }
}

/// Map legacy key names onto stored field names. An existing target key wins.
fn normalize_record(mut record: RawDocument) -> RawDocument {
    rename_key(&mut record, "episode", fields::EPISODE_ID);
    rename_key(&mut record, "URL", fields::URL);
    record
}

fn rename_key(record: &mut RawDocument, from: &str, to: &str) {
    if let Some(value) = record.remove(from) {
        let present = record.get(to).is_some_and(|v| !v.is_null());
        if !present {
            record.insert(to.to_string(), value);
        }
    }
}
