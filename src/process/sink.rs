//! Output sink for process transcripts
//!
//! Every line goes to tracing under the `analyzer` target; when a log file is
//! configured it is also appended to the on-disk transcript.

use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// Writes process output to tracing and an optional transcript file
pub struct LogSink {
    /// Label used in log records (usually the executable)
    label: String,
    /// Transcript path, if one was opened
    path: Option<PathBuf>,
    file: Option<BufWriter<File>>,
}

impl LogSink {
    /// A sink that only logs through tracing
    pub fn disabled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            path: None,
            file: None,
        }
    }

    /// Open a sink, creating (truncating) the transcript file if a path is given.
    ///
    /// Failing to create the transcript is not fatal: the sink falls back to
    /// tracing only.
    pub async fn open(path: Option<&Path>, label: impl Into<String>) -> Self {
        let mut sink = Self::disabled(label);
        let Some(path) = path else {
            return sink;
        };

        match File::create(path).await {
            Ok(file) => {
                sink.path = Some(path.to_path_buf());
                sink.file = Some(BufWriter::new(file));
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed creating transcript file");
            }
        }
        sink
    }

    /// Transcript path, if the file was opened
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record one line of output
    pub async fn write_line(&mut self, line: &str) {
        debug!(target: "analyzer", source = %self.label, "{}", line);

        let Some(file) = self.file.as_mut() else {
            return;
        };
        let result = async {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, "Transcript write failed, disabling transcript");
            self.file = None;
        }
    }

    /// Flush buffered transcript output
    pub async fn flush(&mut self) {
        if let Some(file) = self.file.as_mut()
            && let Err(e) = file.flush().await
        {
            warn!(error = %e, "Failed to flush transcript");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_transcript_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("analysis.log");

        let mut sink = LogSink::open(Some(&path), "kantra").await;
        assert_eq!(sink.path(), Some(path.as_path()));
        sink.write_line("starting").await;
        sink.write_line("done").await;
        sink.flush().await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "starting\ndone\n");
    }

    #[tokio::test]
    async fn test_unwritable_path_falls_back() {
        let mut sink = LogSink::open(Some(Path::new("/nonexistent/dir/analysis.log")), "x").await;
        assert!(sink.path().is_none());
        // Still usable
        sink.write_line("line").await;
        sink.flush().await;
    }
}
