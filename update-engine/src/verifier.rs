//! Background verification of downloaded files.
//!
//! The verifier runs on a blocking worker thread. It decompresses each
//! downloaded file if needed and checks its SHA-1 against the manifest.
//! Failures are reported back so the downloader can fetch the file again.
//!
//! Completion is negotiated explicitly: once the downloader has nothing left
//! to fetch it sends [`VerifyRequest::NoMoreFiles`] carrying the number of
//! failure reports it has consumed so far. Because requests are processed in
//! order, every file submitted before the marker has been checked when the
//! marker is handled. If no failure has been reported that the downloader had
//! not yet seen, the batch is complete.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::{decompress_file, Codec};
use crate::planner::DownloadPlanEntry;
use crate::utils::{FileHash, Result, UpdateError};

/// Work sent to the verifier
#[derive(Debug)]
pub enum VerifyRequest {
    Verify(DownloadPlanEntry),
    NoMoreFiles { failures_seen: u64 },
}

/// Messages from the verifier back to the downloader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierReport {
    /// The file in `slot` did not verify and has to be downloaded again
    Failed { slot: usize, reason: String },

    /// Every submitted file verified
    Completed,
}

/// Handle to a running verifier worker.
pub struct Verifier {
    requests: mpsc::Sender<VerifyRequest>,
    stop: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl Verifier {
    /// Start a worker that verifies files inside `staging_dir`.
    ///
    /// `capacity` bounds the number of files waiting for verification.
    pub fn spawn(
        staging_dir: PathBuf,
        codec: Arc<dyn Codec>,
        capacity: usize,
    ) -> (Self, mpsc::UnboundedReceiver<VerifierReport>) {
        let (requests, request_rx) = mpsc::channel(capacity.max(1));
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let stop = Arc::clone(&stop);
            tokio::task::spawn_blocking(move || {
                run_worker(&staging_dir, codec.as_ref(), request_rx, report_tx, &stop)
            })
        };

        (
            Self {
                requests,
                stop,
                worker,
            },
            report_rx,
        )
    }

    /// Queue a downloaded file; waits while the queue is full.
    pub async fn submit(&self, entry: DownloadPlanEntry) -> Result<()> {
        self.send(VerifyRequest::Verify(entry)).await
    }

    /// Tell the worker that nothing else will be submitted for now.
    pub async fn no_more_files(&self, failures_seen: u64) -> Result<()> {
        self.send(VerifyRequest::NoMoreFiles { failures_seen }).await
    }

    async fn send(&self, request: VerifyRequest) -> Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| UpdateError::InvalidOperation("verifier is no longer running".into()))
    }

    /// Let the worker drain the remaining requests and wait for it to exit.
    pub async fn finish(self) {
        drop(self.requests);
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Verifier worker terminated abnormally");
        }
    }

    /// Abandon remaining requests and wait for the worker to exit.
    pub async fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        self.finish().await;
    }
}

fn run_worker(
    staging_dir: &Path,
    codec: &dyn Codec,
    mut requests: mpsc::Receiver<VerifyRequest>,
    reports: mpsc::UnboundedSender<VerifierReport>,
    stop: &AtomicBool,
) {
    let mut failures_reported: u64 = 0;

    while let Some(request) = requests.blocking_recv() {
        if stop.load(Ordering::SeqCst) {
            debug!("Verifier stopped");
            break;
        }

        match request {
            VerifyRequest::Verify(entry) => match verify_entry(staging_dir, codec, &entry) {
                Ok(()) => {
                    debug!(file = %entry.record.relative_path, "Verified");
                }
                Err(e) => {
                    warn!(file = %entry.record.relative_path, error = %e, "Verification failed");
                    failures_reported += 1;
                    let report = VerifierReport::Failed {
                        slot: entry.slot,
                        reason: e.to_string(),
                    };
                    if reports.send(report).is_err() {
                        break;
                    }
                }
            },
            VerifyRequest::NoMoreFiles { failures_seen } => {
                if failures_seen == failures_reported {
                    info!("All downloaded files verified");
                    if reports.send(VerifierReport::Completed).is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Decompress (if needed) and hash-check one staged file.
pub fn verify_entry(staging_dir: &Path, codec: &dyn Codec, entry: &DownloadPlanEntry) -> Result<()> {
    let record = &entry.record;
    let target = staging_dir.join(&record.relative_path);

    if record.is_compressed() {
        let source = staging_dir.join(record.download_file_name());
        decompress_file(codec, &source, &target).map_err(|e| UpdateError::Verification {
            path: record.relative_path.clone(),
            reason: format!("decompression failed: {}", e),
        })?;
        if let Err(e) = std::fs::remove_file(&source) {
            debug!(path = %source.display(), error = %e, "Unable to remove compressed download");
        }
    }

    let actual = FileHash::of_file(&target).map_err(|e| UpdateError::Verification {
        path: record.relative_path.clone(),
        reason: e.to_string(),
    })?;

    if actual != record.uncompressed_hash {
        return Err(UpdateError::Verification {
            path: record.relative_path.clone(),
            reason: format!("expected {}, got {}", record.uncompressed_hash, actual),
        });
    }

    Ok(())
}
