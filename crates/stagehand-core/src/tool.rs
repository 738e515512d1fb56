//! Auxiliary tool records.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use url::Url;

use crate::errors::TaskError;

/// An auxiliary executable fetched on demand (redistributables, helpers).
#[derive(Debug)]
pub struct ToolInfo {
    name: String,
    url: String,
    exe_path: Mutex<Option<PathBuf>>,
}

impl ToolInfo {
    /// Create a tool record for the executable at `url`.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            exe_path: Mutex::new(None),
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Local executable, once fetched.
    pub fn exe_path(&self) -> Option<PathBuf> {
        self.exe_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record where the executable was saved.
    pub fn set_exe_path(&self, path: impl Into<PathBuf>) {
        *self.exe_path.lock().unwrap_or_else(PoisonError::into_inner) = Some(path.into());
    }

    /// Deterministic local path for this tool: `root/tools/<host>/<file>`.
    pub fn path_from_url(&self, root: &Path) -> Result<PathBuf, TaskError> {
        let parsed = Url::parse(&self.url)
            .map_err(|e| TaskError::transfer(format!("invalid tool url {}: {e}", self.url)))?;

        let file_name = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
            .ok_or_else(|| TaskError::transfer(format!("tool url has no file name: {}", self.url)))?;

        let host = parsed.host_str().unwrap_or("local");

        Ok(root.join("tools").join(host).join(file_name))
    }
}
