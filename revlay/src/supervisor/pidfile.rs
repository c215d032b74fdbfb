//! PID file records

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::errors::RevlayError;
use crate::filesys::file::File;

/// `{pid, started_at}` as stored in `pids/<app>.pid`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    /// Unix timestamp in seconds, 0 when unknown
    pub started_at: i64,
}

impl ProcessRecord {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            started_at: chrono::Utc::now().timestamp(),
        }
    }
}

impl fmt::Display for ProcessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid, self.started_at)
    }
}

impl FromStr for ProcessRecord {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (pid, started_at) = match s.split_once(':') {
            Some((pid, ts)) => (
                pid,
                ts.trim()
                    .parse::<i64>()
                    .map_err(|e| format!("invalid start time '{}': {}", ts, e))?,
            ),
            None => (s, 0),
        };
        let pid = pid
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid pid '{}': {}", pid, e))?;
        if pid == 0 {
            return Err("pid must not be 0".to_string());
        }
        Ok(Self { pid, started_at })
    }
}

/// The PID file of the managed service
#[derive(Debug, Clone)]
pub struct PidFile {
    file: File,
}

impl PidFile {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Read the record.
    ///
    /// A missing file is `None`. Unparsable content is removed and treated
    /// the same way.
    pub async fn read(&self) -> Result<Option<ProcessRecord>, RevlayError> {
        let Some(contents) = self.file.read_string_opt().await? else {
            return Ok(None);
        };
        match contents.parse::<ProcessRecord>() {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                debug!("Reclaiming malformed pid file {}: {}", self.file.path().display(), e);
                self.remove().await?;
                Ok(None)
            }
        }
    }

    pub async fn write(&self, record: &ProcessRecord) -> Result<(), RevlayError> {
        self.file.write_atomic(record.to_string().as_bytes()).await
    }

    pub async fn remove(&self) -> Result<(), RevlayError> {
        self.file.delete().await
    }
}
