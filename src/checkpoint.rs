// Checkpoint file: the decimal epoch-ms of the last processed window boundary.
// A missing or empty file means "no checkpoint yet".

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> anyhow::Result<Option<i64>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("read checkpoint {}", self.path.display()));
            }
        };
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let ts = trimmed
            .parse::<i64>()
            .with_context(|| format!("parse checkpoint {}", self.path.display()))?;
        Ok(Some(ts))
    }

    /// Write via a sibling temp file + rename so a crash never leaves a torn value.
    pub async fn save(&self, checkpoint_ms: i64) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create checkpoint dir {}", parent.display()))?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, checkpoint_ms.to_string())
            .await
            .with_context(|| format!("write checkpoint {}", self.path.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replace checkpoint {}", self.path.display()))?;
        Ok(())
    }
}
