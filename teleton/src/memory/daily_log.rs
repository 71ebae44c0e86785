//! Daily activity logs: one markdown file per UTC day under the memory
//! directory.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tokio::io::AsyncWriteExt;

/// Appends timestamped lines to `YYYY-MM-DD.md` files and reads back the
/// recent window for prompt hydration.
pub struct DailyLog {
    dir: PathBuf,
}

impl DailyLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_for(&self, date: &str) -> PathBuf {
        self.dir.join(format!("{}.md", date))
    }

    pub fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    fn yesterday() -> String {
        (Utc::now() - Duration::days(1)).format("%Y-%m-%d").to_string()
    }

    /// Appends one entry to today's log, creating the file on first write.
    pub async fn append(&self, entry: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.file_for(&Self::today());
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let stamped = format!("- {} {}\n", Utc::now().format("%H:%M:%S"), entry.trim());
        file.write_all(stamped.as_bytes()).await?;
        Ok(())
    }

    /// Today's and yesterday's logs concatenated, oldest first. Missing files
    /// read as empty.
    pub async fn read_recent(&self) -> std::io::Result<String> {
        let mut out = String::new();
        for date in [Self::yesterday(), Self::today()] {
            let path = self.file_for(&date);
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    out.push_str(&format!("## {}\n{}\n", date, content.trim_end()));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
