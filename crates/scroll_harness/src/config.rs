//! Runtime configuration for a verification run.
//!
//! Every setting has a default matching the reference measurement setup (a
//! 1920x1080 viewport, 1 percentage point / 0.05 opacity tolerance, a 50 ms
//! settle interval bounded at one second) and can be overridden from the
//! environment.

use core::time::Duration;
use log::warn;
use scroll_timeline::Tolerance;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::artifact::CapturePolicy;
use crate::error::HarnessError;

/// How the Page Inspector measures an element's vertical position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PositionSource {
    /// The computed `top` property, ignoring transforms.
    #[default]
    ComputedTop,
    /// The top edge of the element's bounding box, transforms included.
    BoundingRect,
}

impl FromStr for PositionSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "computed-top" | "top" => Ok(Self::ComputedTop),
            "bounding-rect" | "rect" => Ok(Self::BoundingRect),
            other => Err(format!("unknown position source '{other}'")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub tolerance: Tolerance,
    /// Delay between the two layout samples that must agree.
    pub settle_interval: Duration,
    /// Upper bound on waiting for the page to settle after a scroll.
    pub settle_timeout: Duration,
    pub capture_policy: CapturePolicy,
    pub artifact_dir: PathBuf,
    pub position_source: PositionSource,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            viewport_width: 1920,
            viewport_height: 1080,
            tolerance: Tolerance::default(),
            settle_interval: Duration::from_millis(50),
            settle_timeout: Duration::from_millis(1000),
            capture_policy: CapturePolicy::OnMismatchOnly,
            artifact_dir: PathBuf::from("target").join("scroll_verify"),
            position_source: PositionSource::ComputedTop,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `SCROLL_VERIFY_VIEWPORT`: viewport as `WIDTHxHEIGHT` (default: 1920x1080)
    /// - `SCROLL_VERIFY_OFFSET_TOLERANCE`: offset tolerance in percentage points (default: 1)
    /// - `SCROLL_VERIFY_OPACITY_TOLERANCE`: opacity tolerance (default: 0.05)
    /// - `SCROLL_VERIFY_SETTLE_INTERVAL_MS`: settle sampling interval (default: 50)
    /// - `SCROLL_VERIFY_SETTLE_TIMEOUT_MS`: settle bound (default: 1000)
    /// - `SCROLL_VERIFY_CAPTURE`: `always`, `on-mismatch` or `never` (default: on-mismatch)
    /// - `SCROLL_VERIFY_ARTIFACT_DIR`: screenshot/report directory
    ///   (default: `target/scroll_verify`)
    /// - `SCROLL_VERIFY_POSITION_SOURCE`: `computed-top` or `bounding-rect`
    ///
    /// Unparseable values are reported with a warning and replaced by the default.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// [`Self::from_env`] over an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let (viewport_width, viewport_height) = parsed_or(
            &lookup,
            "SCROLL_VERIFY_VIEWPORT",
            (defaults.viewport_width, defaults.viewport_height),
            parse_viewport,
        );
        let offset_percent = parsed_or(
            &lookup,
            "SCROLL_VERIFY_OFFSET_TOLERANCE",
            defaults.tolerance.offset_percent,
            parse_non_negative,
        );
        let opacity = parsed_or(
            &lookup,
            "SCROLL_VERIFY_OPACITY_TOLERANCE",
            defaults.tolerance.opacity,
            parse_non_negative,
        );
        let settle_interval = parsed_or(
            &lookup,
            "SCROLL_VERIFY_SETTLE_INTERVAL_MS",
            defaults.settle_interval,
            parse_millis,
        );
        let settle_timeout = parsed_or(
            &lookup,
            "SCROLL_VERIFY_SETTLE_TIMEOUT_MS",
            defaults.settle_timeout,
            parse_millis,
        );
        let capture_policy = parsed_or(
            &lookup,
            "SCROLL_VERIFY_CAPTURE",
            defaults.capture_policy,
            str::parse::<CapturePolicy>,
        );
        let position_source = parsed_or(
            &lookup,
            "SCROLL_VERIFY_POSITION_SOURCE",
            defaults.position_source,
            str::parse::<PositionSource>,
        );
        let artifact_dir = lookup("SCROLL_VERIFY_ARTIFACT_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map_or(defaults.artifact_dir, PathBuf::from);

        Self {
            viewport_width,
            viewport_height,
            tolerance: Tolerance {
                offset_percent,
                opacity,
            },
            settle_interval,
            settle_timeout,
            capture_policy,
            artifact_dir,
            position_source,
        }
    }

    /// Checks the values a run cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidConfig`] for an empty viewport, negative
    /// tolerances, or a settle interval that does not fit in the timeout.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.viewport_width == 0 || self.viewport_height == 0 {
            return Err(HarnessError::InvalidConfig(format!(
                "viewport {}x{} is empty",
                self.viewport_width, self.viewport_height
            )));
        }
        let tolerances_valid = [self.tolerance.offset_percent, self.tolerance.opacity]
            .iter()
            .all(|value| value.is_finite() && *value >= 0.0);
        if !tolerances_valid {
            return Err(HarnessError::InvalidConfig(
                "tolerances must be finite and non-negative".to_owned(),
            ));
        }
        if self.settle_interval.is_zero() || self.settle_interval >= self.settle_timeout {
            return Err(HarnessError::InvalidConfig(format!(
                "settle interval {:?} must be non-zero and shorter than the timeout {:?}",
                self.settle_interval, self.settle_timeout
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn viewport_height_px(&self) -> f64 {
        f64::from(self.viewport_height)
    }
}

fn parsed_or<F, T, P>(lookup: &F, key: &str, default: T, parse: P) -> T
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Result<T, String>,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match parse(raw.trim()) {
        Ok(value) => value,
        Err(err) => {
            warn!("ignoring {key}={raw:?}: {err}");
            default
        }
    }
}

fn parse_viewport(raw: &str) -> Result<(u32, u32), String> {
    let (width, height) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{raw}'"))?;
    let parse_dim = |dim: &str| {
        dim.trim()
            .parse::<u32>()
            .map_err(|err| err.to_string())
            .and_then(|value| {
                (value > 0)
                    .then_some(value)
                    .ok_or_else(|| "viewport dimensions must be positive".to_owned())
            })
    };
    Ok((parse_dim(width)?, parse_dim(height)?))
}

fn parse_non_negative(raw: &str) -> Result<f64, String> {
    let value = raw.parse::<f64>().map_err(|err| err.to_string())?;
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(format!("{value} is not a non-negative number"))
    }
}

fn parse_millis(raw: &str) -> Result<Duration, String> {
    raw.parse::<u64>()
        .map_err(|err| err.to_string())
        .and_then(|millis| {
            (millis > 0)
                .then(|| Duration::from_millis(millis))
                .ok_or_else(|| "duration must be positive".to_owned())
        })
}
