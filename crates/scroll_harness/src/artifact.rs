//! Screenshot and report persistence.
//!
//! Artifacts are best-effort evidence: a failed write is reported as
//! [`HarnessError::ArtifactWrite`] and logged by the runner, never turned into
//! a verification failure.

use image::ImageReader;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, read, write};
use std::io::{Cursor, Result as IoResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::HarnessError;
use crate::report::RunReport;

/// When the runner asks the browser for a screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapturePolicy {
    Always,
    #[default]
    OnMismatchOnly,
    Never,
}

impl CapturePolicy {
    #[inline]
    pub fn should_capture(self, step_mismatched: bool) -> bool {
        match self {
            Self::Always => true,
            Self::OnMismatchOnly => step_mismatched,
            Self::Never => false,
        }
    }
}

impl FromStr for CapturePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "always" => Ok(Self::Always),
            "on-mismatch" | "on-mismatch-only" => Ok(Self::OnMismatchOnly),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown capture policy '{other}'")),
        }
    }
}

/// Where a captured screenshot ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: PathBuf,
    /// `[width, height]` of the decoded PNG, when it could be read.
    pub dimensions: Option<[u32; 2]>,
}

/// Sink for run artifacts, keyed by scenario name and step index.
pub trait ArtifactStore {
    /// Deterministic location of the screenshot for a step.
    fn screenshot_path(&self, scenario: &str, step: usize) -> PathBuf;

    /// Persists PNG bytes for a step.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ArtifactWrite`] if the bytes cannot be stored.
    fn store_screenshot(
        &self,
        scenario: &str,
        step: usize,
        png: &[u8],
    ) -> Result<ArtifactRef, HarnessError>;

    /// Persists the structured run report.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ArtifactWrite`] if the report cannot be stored.
    fn store_report(&self, report: &RunReport) -> Result<PathBuf, HarnessError>;
}

/// Writes artifacts below a root directory as
/// `<root>/<scenario>/step-NNN.png` and `<root>/<scenario>/report.json`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scenario_dir(&self, scenario: &str) -> PathBuf {
        self.root.join(sanitize_name(scenario))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn screenshot_path(&self, scenario: &str, step: usize) -> PathBuf {
        self.scenario_dir(scenario).join(format!("step-{step:03}.png"))
    }

    fn store_screenshot(
        &self,
        scenario: &str,
        step: usize,
        png: &[u8],
    ) -> Result<ArtifactRef, HarnessError> {
        let path = self.screenshot_path(scenario, step);
        let changed = write_bytes_if_changed(&path, png)
            .map_err(|err| HarnessError::artifact_write(path.clone(), err))?;
        debug!(
            "screenshot {} {}",
            path.display(),
            if changed { "written" } else { "unchanged" }
        );
        Ok(ArtifactRef {
            dimensions: png_dimensions(png),
            path,
        })
    }

    fn store_report(&self, report: &RunReport) -> Result<PathBuf, HarnessError> {
        let path = self.scenario_dir(&report.scenario).join("report.json");
        write_report(&path, report)?;
        Ok(path)
    }
}

/// Serializes a run report as pretty-printed JSON.
///
/// # Errors
///
/// Returns [`HarnessError::ArtifactWrite`] if serialization or the write fails.
pub fn write_report(path: &Path, report: &RunReport) -> Result<(), HarnessError> {
    let json = serde_json::to_vec_pretty(report)
        .map_err(|err| HarnessError::artifact_write(path.to_path_buf(), err))?;
    write_bytes_if_changed(path, &json)
        .map_err(|err| HarnessError::artifact_write(path.to_path_buf(), err))?;
    Ok(())
}

/// Writes bytes to a file only if the content has changed.
fn write_bytes_if_changed(path: &Path, bytes: &[u8]) -> IoResult<bool> {
    if let Ok(existing) = read(path)
        && existing == bytes
    {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    write(path, bytes)?;
    Ok(true)
}

fn png_dimensions(png: &[u8]) -> Option<[u32; 2]> {
    let dimensions = ImageReader::new(Cursor::new(png))
        .with_guessed_format()
        .map_err(anyhow::Error::from)
        .and_then(|reader| reader.into_dimensions().map_err(anyhow::Error::from));
    match dimensions {
        Ok((width, height)) => Some([width, height]),
        Err(err) => {
            warn!("screenshot is not a readable image: {err}");
            None
        }
    }
}

/// Keeps scenario names usable as a single path component.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "scenario".to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::png::PngEncoder;
    use image::{ColorType, ImageEncoder as _};

    fn tiny_png(width: u32, height: u32) -> Vec<u8> {
        let rgba = vec![200_u8; (width * height * 4) as usize];
        let mut buf = Vec::new();
        PngEncoder::new(&mut buf)
            .write_image(&rgba, width, height, ColorType::Rgba8.into())
            .unwrap();
        buf
    }

    #[test]
    fn capture_policy_decisions() {
        assert!(CapturePolicy::Always.should_capture(false));
        assert!(CapturePolicy::OnMismatchOnly.should_capture(true));
        assert!(!CapturePolicy::OnMismatchOnly.should_capture(false));
        assert!(!CapturePolicy::Never.should_capture(true));
    }

    #[test]
    fn capture_policy_parses_env_spellings() {
        assert_eq!("on-mismatch".parse::<CapturePolicy>(), Ok(CapturePolicy::OnMismatchOnly));
        assert_eq!("ON_MISMATCH_ONLY".parse::<CapturePolicy>(), Ok(CapturePolicy::OnMismatchOnly));
        assert_eq!(" never ".parse::<CapturePolicy>(), Ok(CapturePolicy::Never));
        assert!("sometimes".parse::<CapturePolicy>().is_err());
    }

    #[test]
    fn screenshot_paths_are_deterministic() {
        let store = FsArtifactStore::new("/artifacts");
        assert_eq!(
            store.screenshot_path("hero scroll/back", 7),
            PathBuf::from("/artifacts/hero_scroll_back/step-007.png")
        );
        assert_eq!(
            store.screenshot_path("..", 0),
            PathBuf::from("/artifacts/scenario/step-000.png")
        );
    }

    #[test]
    fn stores_screenshot_with_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let stored = store.store_screenshot("hero", 2, &tiny_png(4, 3)).unwrap();
        assert_eq!(stored.dimensions, Some([4, 3]));
        assert!(stored.path.ends_with("hero/step-002.png"));
        assert!(stored.path.exists());
    }

    #[test]
    fn unreadable_screenshot_is_still_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let stored = store.store_screenshot("hero", 0, b"not a png").unwrap();
        assert_eq!(stored.dimensions, None);
        assert_eq!(read(&stored.path).unwrap(), b"not a png");
    }

    #[test]
    fn unchanged_bytes_are_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.bin");
        assert!(write_bytes_if_changed(&path, b"abc").unwrap());
        assert!(!write_bytes_if_changed(&path, b"abc").unwrap());
        assert!(write_bytes_if_changed(&path, b"abd").unwrap());
    }

    #[test]
    fn write_failure_is_an_artifact_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        write(&blocker, b"file, not a directory").unwrap();
        let store = FsArtifactStore::new(&blocker);
        let err = store.store_screenshot("hero", 0, b"png").unwrap_err();
        assert!(matches!(err, HarnessError::ArtifactWrite { .. }));
        assert!(!err.is_fatal());
    }
}
