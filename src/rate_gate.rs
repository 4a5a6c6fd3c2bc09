// Cross-invocation pacing. The last successful upload time lives in a
// small text file; every run reads it before uploading and rewrites it
// after a confirmed success.
//
// The file is not locked. Two runs started at the same moment can both
// see an expired cool-down and upload back to back.

use crate::error::{Result, UploadError};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RateGate {
    state_path: PathBuf,
}

impl RateGate {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Block until at least `min_interval_secs` have passed since the last
    /// committed upload. Returns immediately when the interval is disabled
    /// or nothing was ever committed.
    pub fn wait(&self, min_interval_secs: i64) -> Result<()> {
        if let Some(remaining) = self.remaining_at(Utc::now(), min_interval_secs)? {
            warn!(
                "last upload was too recent, sleeping {:.1}s before uploading",
                remaining.as_secs_f64()
            );
            thread::sleep(remaining);
        }
        Ok(())
    }

    /// How long a caller at `now` still has to wait, if at all: exactly
    /// `interval - (now - last)`. A last upload stamped in the future (clock
    /// skew) therefore waits longer than one interval.
    pub fn remaining_at(
        &self,
        now: DateTime<Utc>,
        min_interval_secs: i64,
    ) -> Result<Option<Duration>> {
        if min_interval_secs <= 0 {
            return Ok(None);
        }
        let Some(last) = self.last_upload()? else {
            debug!("no previous upload recorded at {}", self.state_path.display());
            return Ok(None);
        };
        let last = DateTime::from_timestamp(last, 0).ok_or_else(|| UploadError::RateStateRead {
            path: self.state_path.clone(),
            reason: format!("timestamp {} out of range", last),
        })?;

        let interval = chrono::Duration::seconds(min_interval_secs);
        let elapsed = now.signed_duration_since(last);
        if elapsed >= interval {
            return Ok(None);
        }
        Ok((interval - elapsed).to_std().ok())
    }

    /// Last committed unix timestamp, `None` if the state file is absent.
    pub fn last_upload(&self) -> Result<Option<i64>> {
        let data = match fs::read_to_string(&self.state_path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(UploadError::RateStateRead {
                    path: self.state_path.clone(),
                    reason: e.to_string(),
                })
            }
        };

        data.trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|e| UploadError::RateStateRead {
                path: self.state_path.clone(),
                reason: format!("invalid timestamp {:?}: {}", data, e),
            })
    }

    /// Record "now" as the last successful upload, creating parent
    /// directories as needed. Overwrites any previous value.
    pub fn commit(&self) -> io::Result<()> {
        self.commit_at(Utc::now().timestamp())
    }

    pub fn commit_at(&self, timestamp: i64) -> io::Result<()> {
        if let Some(dir) = self.state_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(&self.state_path, timestamp.to_string())?;
        debug!(
            "recorded upload time {} in {}",
            timestamp,
            self.state_path.display()
        );
        Ok(())
    }
}
