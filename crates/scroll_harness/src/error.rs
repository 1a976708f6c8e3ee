//! Failure taxonomy of a verification run.
//!
//! Configuration errors stop a run before the browser is touched, a settle
//! timeout degrades a single step, an inspection error aborts the run, and an
//! artifact write error is only logged.

use scroll_timeline::InvalidTimelineError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid timeline: {0}")]
    InvalidTimeline(#[from] InvalidTimelineError),

    #[error("invalid harness configuration: {0}")]
    InvalidConfig(String),

    #[error("no selector for element '{element}' of section {section}")]
    UnmappedElement { section: usize, element: String },

    #[error("page did not settle within {waited:?}")]
    SettleTimeout { waited: Duration },

    #[error("page inspection failed: {context}")]
    Inspection {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not write artifact {}", path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl HarnessError {
    pub(crate) fn inspection(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Inspection {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn artifact_write(path: PathBuf, source: impl Into<anyhow::Error>) -> Self {
        Self::ArtifactWrite {
            path,
            source: source.into(),
        }
    }

    /// Whether this error ends the whole run rather than a single step.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::SettleTimeout { .. } | Self::ArtifactWrite { .. })
    }
}
