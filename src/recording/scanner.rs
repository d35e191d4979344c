//! Discovers call recordings under the vendor recorder directories.

use super::models::RecordingFile;
use super::phone::PhoneNumberExtractor;
use crate::clock::Clock;
use crate::config::ScannerSettings;
use anyhow::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Where the stock recorders of the common vendors save call recordings.
pub const DEFAULT_RECORDING_ROOTS: &[&str] = &[
    "/storage/emulated/0/Call recordings/",
    "/storage/emulated/0/Recordings/Call/",
    "/storage/emulated/0/MIUI/sound_recorder/call_rec/",
    "/storage/emulated/0/SamsungRecorder/Call/",
    "/storage/emulated/0/recorder/call/",
    "/storage/emulated/0/Recorder/",
    "/storage/emulated/0/Voice Recorder/",
];

pub const DEFAULT_RECORDING_EXTENSIONS: &[&str] = &["mp3", "m4a", "amr", "3gp", "wav", "aac"];

const HOUR_MS: i64 = 3_600_000;

pub struct RecordingScanner {
    roots: Vec<PathBuf>,
    extensions: Vec<String>,
    extractor: PhoneNumberExtractor,
    today_window_ms: i64,
    clock: Arc<dyn Clock>,
}

impl RecordingScanner {
    pub fn new(settings: &ScannerSettings, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            roots: settings.roots.clone(),
            extensions: settings
                .extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            extractor: PhoneNumberExtractor::new(&settings.phone_patterns)?,
            today_window_ms: settings.today_window_hours as i64 * HOUR_MS,
            clock,
        })
    }

    /// Recordings modified at or after `since_ms`, deduplicated by path.
    ///
    /// Unreadable roots and entries are logged and skipped, so the result is
    /// best-effort and may be empty.
    pub fn scan(&self, since_ms: i64) -> Vec<RecordingFile> {
        let mut seen = HashSet::new();
        let mut recordings = Vec::new();

        for root in &self.roots {
            let before = recordings.len();
            self.scan_root(root, since_ms, &mut seen, &mut recordings);
            let found = recordings.len() - before;
            if found > 0 {
                debug!("Found {} recordings in {:?}", found, root);
            }
        }

        info!("Scan found {} recordings", recordings.len());
        recordings
    }

    pub fn scan_all(&self) -> Vec<RecordingFile> {
        self.scan(0)
    }

    /// Recordings of the trailing window (24 hours by default).
    pub fn scan_today(&self) -> Vec<RecordingFile> {
        self.scan(self.clock.now_ms() - self.today_window_ms)
    }

    fn scan_root(
        &self,
        root: &Path,
        since_ms: i64,
        seen: &mut HashSet<PathBuf>,
        recordings: &mut Vec<RecordingFile>,
    ) {
        match std::fs::metadata(root) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => {
                debug!("Skipping {:?}: not a directory", root);
                return;
            }
            Err(err) => {
                debug!("Skipping {:?}: {}", root, err);
                return;
            }
        }

        // Symlinked files are followed, symlinked directories are not descended
        for entry in WalkDir::new(root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Cannot read entry under {:?}: {}", root, err);
                    continue;
                }
            };
            if entry.file_type().is_dir()
                || !self.has_supported_extension(&entry.file_name().to_string_lossy())
            {
                continue;
            }
            let metadata = match std::fs::metadata(entry.path()) {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(err) => {
                    warn!("Cannot stat {:?}: {}", entry.path(), err);
                    continue;
                }
            };
            let last_modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            if last_modified < since_ms {
                continue;
            }

            let path = entry
                .path()
                .canonicalize()
                .unwrap_or_else(|_| entry.path().to_path_buf());
            if !seen.insert(path.clone()) {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy().to_string();
            recordings.push(RecordingFile {
                phone_number: self.extractor.extract(&file_name),
                file_name,
                file_path: path.to_string_lossy().to_string(),
                file_size: metadata.len(),
                last_modified,
                duration: None,
            });
        }
    }

    fn has_supported_extension(&self, file_name: &str) -> bool {
        file_extension(file_name)
            .map(|ext| ext.to_lowercase())
            .map_or(false, |ext| self.extensions.iter().any(|e| *e == ext))
    }
}

/// Text after the last dot. A bare `.mp3` has the extension `mp3`.
fn file_extension(file_name: &str) -> Option<&str> {
    file_name.rsplit_once('.').map(|(_, ext)| ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::fs::File;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn write_recording(dir: &Path, name: &str, modified_ms: i64) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, b"audio").unwrap();
        let file = File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_millis(modified_ms as u64))
            .unwrap();
        path
    }

    fn make_scanner(roots: Vec<PathBuf>, now_ms: i64) -> RecordingScanner {
        let settings = ScannerSettings {
            roots,
            ..Default::default()
        };
        RecordingScanner::new(&settings, Arc::new(ManualClock::new(now_ms))).unwrap()
    }

    const NOW: i64 = 1_737_700_000_000;

    #[test]
    fn scan_filters_by_extension_and_time() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Recorder");
        write_recording(&root, "01012345678_20250124.mp3", NOW - 1_000);
        write_recording(&root, "01022223333.M4A", NOW - 2_000);
        write_recording(&root, "notes.txt", NOW - 1_000);
        write_recording(&root, "01044445555.amr", NOW - 10 * HOUR_MS);
        write_recording(&root.join("2025/01"), "0212345678.wav", NOW - 3_000);

        let scanner = make_scanner(vec![root.clone()], NOW);

        let mut all = scanner.scan_all();
        all.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        let names: Vec<&str> = all.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "01012345678_20250124.mp3",
                "01022223333.M4A",
                "01044445555.amr",
                "0212345678.wav"
            ]
        );
        assert_eq!(all[0].phone_number.as_deref(), Some("01012345678"));
        assert_eq!(all[0].file_size, 5);
        assert_eq!(all[0].last_modified, NOW - 1_000);

        let recent = scanner.scan(NOW - HOUR_MS);
        assert_eq!(recent.len(), 3);
        assert!(recent.iter().all(|r| r.file_name != "01044445555.amr"));
    }

    #[test]
    fn scan_today_uses_trailing_window() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Call");
        write_recording(&root, "01011112222.mp3", NOW - 23 * HOUR_MS);
        write_recording(&root, "01033334444.mp3", NOW - 25 * HOUR_MS);

        let today = make_scanner(vec![root], NOW).scan_today();
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].phone_number.as_deref(), Some("01011112222"));
    }

    #[test]
    fn scan_includes_exact_since_boundary() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Call");
        write_recording(&root, "01011112222.mp3", NOW - 5_000);

        assert_eq!(make_scanner(vec![root.clone()], NOW).scan(NOW - 5_000).len(), 1);
        assert!(make_scanner(vec![root], NOW).scan(NOW - 4_999).is_empty());
    }

    #[test]
    fn missing_and_non_directory_roots_are_skipped() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Recordings");
        write_recording(&root, "01011112222.aac", NOW);
        let plain_file = write_recording(temp.path(), "not_a_dir.mp3", NOW);

        let scanner = make_scanner(vec![temp.path().join("missing"), plain_file, root], NOW);
        let found = scanner.scan_all();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file_name, "01011112222.aac");
    }

    #[test]
    fn overlapping_roots_are_deduplicated() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Recordings");
        let nested = root.join("Call");
        write_recording(&nested, "01011112222.3gp", NOW);

        let found = make_scanner(vec![root, nested], NOW).scan_all();
        assert_eq!(found.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_root_counts_once() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Recorder");
        write_recording(&root, "01011112222.mp3", NOW);
        let link = temp.path().join("Voice Recorder");
        std::os::unix::fs::symlink(&root, &link).unwrap();

        let found = make_scanner(vec![root, link], NOW).scan_all();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn recordings_without_number_are_kept() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Recorder");
        write_recording(&root, "Voice 001.m4a", NOW);

        let found = make_scanner(vec![root], NOW).scan_all();
        assert_eq!(found.len(), 1);
        assert!(found[0].phone_number.is_none());
    }

    #[test]
    fn extension_is_text_after_last_dot() {
        assert_eq!(file_extension("call.MP3"), Some("MP3"));
        assert_eq!(file_extension("a.b.m4a"), Some("m4a"));
        assert_eq!(file_extension(".mp3"), Some("mp3"));
        assert_eq!(file_extension("README"), None);

        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Recorder");
        write_recording(&root, ".mp3", NOW);
        let found = make_scanner(vec![root], NOW).scan_all();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file_name, ".mp3");
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_recording_files_are_found() {
        let temp = TempDir::new().unwrap();
        let storage = temp.path().join("storage");
        let target = write_recording(&storage, "01011112222.mp3", NOW - 1_000);
        let root = temp.path().join("Recorder");
        std::fs::create_dir_all(&root).unwrap();
        std::os::unix::fs::symlink(&target, root.join("01011112222.mp3")).unwrap();
        std::os::unix::fs::symlink(root.join("gone.mp3"), root.join("dangling.mp3")).unwrap();

        let found = make_scanner(vec![root], NOW).scan_all();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file_size, 5);
        assert_eq!(found[0].last_modified, NOW - 1_000);
        assert_eq!(found[0].phone_number.as_deref(), Some("01011112222"));
    }
}
