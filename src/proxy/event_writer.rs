//! Append-only writer for the capture log
//!
//! A single background task owns the log file. Callers hand it finished lines
//! through an unbounded channel and never wait, so lines land in the file in
//! the order they were enqueued. Write failures are dropped at the task
//! boundary: the capture log is best-effort and must never affect request
//! handling.

use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

enum WriterCommand {
    Append { path: PathBuf, line: String },
    Flush(oneshot::Sender<()>),
}

/// Handle to the capture log writer task
#[derive(Clone, Debug)]
pub struct EventWriter {
    tx: mpsc::UnboundedSender<WriterCommand>,
}

impl EventWriter {
    /// Start the writer task on the current runtime
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(rx));
        Self { tx }
    }

    /// Enqueue one line for `path`; a trailing newline is added
    pub fn append(&self, path: &Path, mut line: String) {
        line.push('\n');
        let _ = self.tx.send(WriterCommand::Append {
            path: path.to_path_buf(),
            line,
        });
    }

    /// Wait until everything enqueued so far has been written
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriterCommand::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

struct OpenLog {
    path: PathBuf,
    file: File,
}

async fn run_writer(mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
    let mut current: Option<OpenLog> = None;

    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Append { path, line } => {
                if let Err(e) = write_line(&mut current, path, line.as_bytes()).await {
                    debug!(error = %e, "dropping capture event");
                }
            }
            WriterCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }

    debug!("capture log writer stopped");
}

async fn write_line(
    current: &mut Option<OpenLog>,
    path: PathBuf,
    line: &[u8],
) -> std::io::Result<()> {
    let reuse = current.as_ref().is_some_and(|open| open.path == path);
    if !reuse {
        *current = None;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!(path = %path.display(), "capture log opened");
        *current = Some(OpenLog { path, file });
    }

    if let Some(open) = current.as_mut() {
        let result = async {
            open.file.write_all(line).await?;
            open.file.flush().await
        }
        .await;
        if result.is_err() {
            // reopen on the next line
            *current = None;
        }
        result?;
    }
    Ok(())
}
