//! Download session: fetches planned files and feeds them to the verifier.
//!
//! Files are taken from a stack, so the last planned file is fetched first.
//! A file is only popped once its transfer succeeded. Transfer failures and
//! verification failures both count against the file's retry budget; a file
//! that fails more than `max_retries` times fails the whole session.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::Codec;
use crate::mirror::Mirror;
use crate::planner::{DownloadPlan, DownloadPlanEntry};
use crate::transfer::{format_bytes, DownloadProgress, ProgressCallback, Transport};
use crate::utils::lock;
use crate::verifier::{Verifier, VerifierReport};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_VERIFY_QUEUE_CAPACITY: usize = 64;

/// Lifecycle of a downloader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloaderState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Terminal result of a download session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// Receives a snapshot on every transport progress tick
pub type DownloadProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Per-slot failure counts for one session
#[derive(Debug, Clone)]
pub struct RetryLedger {
    failures: Vec<u32>,
}

impl RetryLedger {
    pub fn new(slots: usize) -> Self {
        Self {
            failures: vec![0; slots],
        }
    }

    /// Count a failure for `slot`, returning the new total
    pub fn record_failure(&mut self, slot: usize) -> u32 {
        if slot >= self.failures.len() {
            self.failures.resize(slot + 1, 0);
        }
        self.failures[slot] += 1;
        self.failures[slot]
    }

    pub fn failures(&self, slot: usize) -> u32 {
        self.failures.get(slot).copied().unwrap_or(0)
    }
}

/// Downloads the files of a [`DownloadPlan`] from one mirror.
pub struct Downloader {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    max_retries: u32,
    verify_queue_capacity: usize,
    on_progress: Option<DownloadProgressCallback>,
    cancel: CancellationToken,
    // Serializes "check cancellation, start transfer" against cancel()
    gate: Mutex<()>,
    state: Mutex<DownloaderState>,
}

impl Downloader {
    pub fn new(transport: Arc<dyn Transport>, codec: Arc<dyn Codec>) -> Self {
        Self {
            transport,
            codec,
            max_retries: DEFAULT_MAX_RETRIES,
            verify_queue_capacity: DEFAULT_VERIFY_QUEUE_CAPACITY,
            on_progress: None,
            cancel: CancellationToken::new(),
            gate: Mutex::new(()),
            state: Mutex::new(DownloaderState::Idle),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_verify_queue_capacity(mut self, capacity: usize) -> Self {
        self.verify_queue_capacity = capacity;
        self
    }

    pub fn with_progress(mut self, callback: DownloadProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn state(&self) -> DownloaderState {
        *lock(&self.state)
    }

    /// Request cancellation. A transfer created after this returns is never
    /// created; one created before it, whether already polled or not, is
    /// dropped before its result is used and its partial file removed.
    pub fn cancel(&self) {
        let _gate = lock(&self.gate);
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Download every planned file into `staging_dir` and wait until all of
    /// them have been verified.
    pub async fn run(&self, plan: &DownloadPlan, mirror: &Mirror, staging_dir: &Path) -> DownloadOutcome {
        *lock(&self.state) = DownloaderState::Running;

        let (verifier, reports) = Verifier::spawn(
            staging_dir.to_path_buf(),
            Arc::clone(&self.codec),
            self.verify_queue_capacity,
        );

        let mut session = Session {
            plan,
            ledger: RetryLedger::new(plan.slot_count),
            by_slot: plan
                .entries
                .iter()
                .enumerate()
                .map(|(index, entry)| (entry.slot, index))
                .collect(),
            stack: (0..plan.entries.len()).collect(),
            total_to_download: plan.total_download_size(),
            received: 0,
            failures_seen: 0,
        };

        info!(
            mirror = %mirror.ui_name,
            files = plan.entries.len(),
            size = %format_bytes(session.total_to_download),
            "Starting download"
        );

        let outcome = self
            .drive(&mut session, &verifier, reports, mirror, staging_dir)
            .await;

        match outcome {
            DownloadOutcome::Completed => verifier.finish().await,
            _ => verifier.stop().await,
        }

        *lock(&self.state) = match outcome {
            DownloadOutcome::Completed => DownloaderState::Completed,
            DownloadOutcome::Failed(_) => DownloaderState::Failed,
            DownloadOutcome::Cancelled => DownloaderState::Cancelled,
        };

        match &outcome {
            DownloadOutcome::Completed => info!("Download completed"),
            DownloadOutcome::Failed(reason) => warn!(%reason, "Download failed"),
            DownloadOutcome::Cancelled => info!("Download cancelled"),
        }
        outcome
    }

    async fn drive(
        &self,
        session: &mut Session<'_>,
        verifier: &Verifier,
        mut reports: mpsc::UnboundedReceiver<VerifierReport>,
        mirror: &Mirror,
        staging_dir: &Path,
    ) -> DownloadOutcome {
        loop {
            while let Ok(report) = reports.try_recv() {
                if let Some(outcome) = self.handle_report(session, report) {
                    return outcome;
                }
            }

            let Some(&index) = session.stack.last() else {
                // Nothing left to fetch: wait for the verifier's verdict
                if verifier.no_more_files(session.failures_seen).await.is_err() {
                    return DownloadOutcome::Failed("verifier stopped unexpectedly".into());
                }
                let report = tokio::select! {
                    report = reports.recv() => report,
                    _ = self.cancel.cancelled() => return DownloadOutcome::Cancelled,
                };
                match report {
                    Some(report) => {
                        if let Some(outcome) = self.handle_report(session, report) {
                            return outcome;
                        }
                    }
                    None => return DownloadOutcome::Failed("verifier stopped unexpectedly".into()),
                }
                continue;
            };

            let plan = session.plan;
            let entry = &plan.entries[index];
            let url = mirror.file_url(&entry.record.download_file_name());
            let destination = staging_dir.join(entry.record.download_file_name());
            let progress = self.progress_callback(session, entry);

            let transfer = {
                let _gate = lock(&self.gate);
                if self.cancel.is_cancelled() {
                    return DownloadOutcome::Cancelled;
                }
                debug!(file = %entry.record.relative_path, %url, "Downloading");
                self.transport.fetch(&url, &destination, progress)
            };

            // Cancellation is checked before every poll of the transfer
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    discard_partial(&destination);
                    return DownloadOutcome::Cancelled;
                }
                result = transfer => result,
            };

            match result {
                Ok(_) => {
                    session.received += entry.record.download_size();
                    session.stack.pop();
                    let submitted = tokio::select! {
                        submitted = verifier.submit(entry.clone()) => submitted,
                        _ = self.cancel.cancelled() => return DownloadOutcome::Cancelled,
                    };
                    if submitted.is_err() {
                        return DownloadOutcome::Failed("verifier stopped unexpectedly".into());
                    }
                }
                Err(e) => {
                    let failures = session.ledger.record_failure(entry.slot);
                    warn!(
                        file = %entry.record.relative_path,
                        attempt = failures,
                        error = %e,
                        "Download failed"
                    );
                    if failures > self.max_retries {
                        return DownloadOutcome::Failed(format!(
                            "Downloading {} failed {} times: {}",
                            entry.record.relative_path, failures, e
                        ));
                    }
                }
            }
        }
    }

    /// Apply a verifier report. Returns an outcome when the session is over.
    fn handle_report(&self, session: &mut Session<'_>, report: VerifierReport) -> Option<DownloadOutcome> {
        match report {
            VerifierReport::Completed => Some(DownloadOutcome::Completed),
            VerifierReport::Failed { slot, reason } => {
                session.failures_seen += 1;
                let Some(&index) = session.by_slot.get(&slot) else {
                    return Some(DownloadOutcome::Failed(format!(
                        "verifier reported unknown file slot {}",
                        slot
                    )));
                };
                let plan = session.plan;
                let entry = &plan.entries[index];
                session.received = session.received.saturating_sub(entry.record.download_size());

                let failures = session.ledger.record_failure(slot);
                if failures > self.max_retries {
                    return Some(DownloadOutcome::Failed(format!(
                        "{} failed verification {} times: {}",
                        entry.record.relative_path, failures, reason
                    )));
                }

                debug!(file = %entry.record.relative_path, attempt = failures, "Re-queueing file");
                session.stack.push(index);
                None
            }
        }
    }

    fn progress_callback(&self, session: &Session<'_>, entry: &DownloadPlanEntry) -> ProgressCallback {
        let Some(on_progress) = self.on_progress.clone() else {
            return Arc::new(|_: u64| {});
        };

        let base = session.received;
        let total = session.total_to_download;
        let file_size = entry.record.download_size();
        let file = entry.record.relative_path.clone();

        Arc::new(move |file_received| {
            on_progress(DownloadProgress {
                total_bytes_received: base + file_received.min(file_size),
                total_bytes_to_download: total,
                file_bytes_received: file_received,
                current_file_size: file_size,
                current_file: file.clone(),
            })
        })
    }
}

struct Session<'a> {
    plan: &'a DownloadPlan,
    ledger: RetryLedger,
    by_slot: HashMap<usize, usize>,
    stack: Vec<usize>,
    total_to_download: u64,
    received: u64,
    failures_seen: u64,
}

fn discard_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "Unable to remove partial download");
        }
    }
}
