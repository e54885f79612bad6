//! Update orchestration: check → plan → download/verify → hand off.
//!
//! [`Updater`] is the entry point for the host application. Checks and
//! updates run as spawned tasks; their progress is published as
//! [`UpdateEvent`]s on a broadcast channel.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::codec::{Codec, ZstdCodec};
use crate::config::{Config, UpdaterConfig};
use crate::downloader::{DownloadOutcome, Downloader};
use crate::handoff::{SecondStageConfig, WaitStrategy};
use crate::instance::InstanceGuard;
use crate::manifest::{
    estimate_update_size, LocalManifest, RemoteManifest, VersionInfo, LOCAL_MANIFEST_FILE,
    REMOTE_MANIFEST_FILE,
};
use crate::mirror::{Mirror, MirrorRegistry};
use crate::planner::{plan_downloads, sweep_staging};
use crate::transfer::{format_bytes, DownloadProgress, HttpTransport, Transport};
use crate::utils::{lock, Result, UpdateError};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What the last check found out about the installed build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Unknown,
    UpToDate,
    Outdated,
    CheckFailed,
}

/// Notifications for the user interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    CheckFailed,
    UpToDate,
    Outdated {
        display_string: String,
        estimated_size: u64,
    },
    /// Comparing installed files against the remote manifest
    Preparing {
        percent: u8,
    },
    DownloadProgress {
        total_percent: u8,
        file_percent: u8,
        current_file: String,
    },
    /// The second stage has been launched; the host should exit
    UpdateCompleted,
    UpdateFailed {
        message: String,
    },
    UpdateCancelled,
}

/// Result of an update task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// Starts the second-stage process.
pub trait HandoffLauncher: Send + Sync {
    fn launch(&self, executable: &Path, config: &Path) -> Result<()>;
}

/// Spawns the second stage as a detached child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl HandoffLauncher for ProcessLauncher {
    fn launch(&self, executable: &Path, config: &Path) -> Result<()> {
        let mut command = Command::new(executable);
        command.arg("--config").arg(config);
        if let Some(dir) = executable.parent() {
            command.current_dir(dir);
        }
        command
            .spawn()
            .map_err(|e| UpdateError::filesystem(executable, e))?;
        Ok(())
    }
}

#[derive(Default)]
struct Busy {
    checking: bool,
    updating: bool,
}

struct CheckResult {
    state: BuildState,
    remote: Option<Arc<RemoteManifest>>,
    mirror: Option<Mirror>,
}

struct Inner {
    config: UpdaterConfig,
    mirrors: Mutex<MirrorRegistry>,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    launcher: Arc<dyn HandoffLauncher>,
    events: broadcast::Sender<UpdateEvent>,
    busy: Mutex<Busy>,
    last_check: Mutex<CheckResult>,
    active: Mutex<Option<Arc<Downloader>>>,
}

/// Handle to the update engine. Cheap to clone.
#[derive(Clone)]
pub struct Updater {
    inner: Arc<Inner>,
}

impl Updater {
    pub fn new(config: UpdaterConfig, mirrors: MirrorRegistry, transport: Arc<dyn Transport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                mirrors: Mutex::new(mirrors),
                transport,
                codec: Arc::new(ZstdCodec::default()),
                launcher: Arc::new(ProcessLauncher),
                events,
                busy: Mutex::new(Busy::default()),
                last_check: Mutex::new(CheckResult {
                    state: BuildState::Unknown,
                    remote: None,
                    mirror: None,
                }),
                active: Mutex::new(None),
            }),
        }
    }

    /// Build an updater over HTTP from a configuration file's contents.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut mirrors = MirrorRegistry::new();
        mirrors.load_from_file(&config.updater.mirrors_path())?;
        let transport = Arc::new(HttpTransport::new()?);
        Ok(Self::new(config.updater.clone(), mirrors, transport))
    }

    /// Replace the codec. Only valid before the updater is shared.
    pub fn with_codec(self, codec: Arc<dyn Codec>) -> Self {
        self.map_inner(|inner| inner.codec = codec)
    }

    /// Replace the second-stage launcher. Only valid before the updater is shared.
    pub fn with_launcher(self, launcher: Arc<dyn HandoffLauncher>) -> Self {
        self.map_inner(|inner| inner.launcher = launcher)
    }

    fn map_inner(mut self, f: impl FnOnce(&mut Inner)) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => f(inner),
            None => warn!("Updater already shared; configuration change ignored"),
        }
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.inner.config
    }

    pub fn build_state(&self) -> BuildState {
        lock(&self.inner.last_check).state
    }

    /// Version found on the mirror by the last successful check
    pub fn remote_version(&self) -> Option<VersionInfo> {
        lock(&self.inner.last_check)
            .remote
            .as_ref()
            .map(|remote| remote.version.clone())
    }

    pub fn set_mirror_rating(&self, index: usize, rating: i32) {
        lock(&self.inner.mirrors).set_rating(index, rating);
    }

    /// Take the single-instance lock the second stage waits on, if configured.
    pub fn acquire_instance_guard(&self) -> Result<Option<InstanceGuard>> {
        self.inner
            .config
            .instance_guid
            .as_deref()
            .map(InstanceGuard::acquire)
            .transpose()
    }

    /// Manifest of the installed build, if present and readable
    pub fn read_local_manifest(&self) -> Option<LocalManifest> {
        self.inner.read_local_manifest()
    }

    /// Display string of the installed version
    pub fn local_version_display(&self) -> Option<String> {
        self.read_local_manifest()
            .map(|manifest| manifest.version.display_string)
    }

    /// Start checking the mirrors for a newer build.
    ///
    /// Returns `None` while a check or update is already running.
    pub fn check_for_updates(&self) -> Option<JoinHandle<BuildState>> {
        {
            let mut busy = lock(&self.inner.busy);
            if busy.checking || busy.updating {
                debug!("Check requested while busy; ignored");
                return None;
            }
            busy.checking = true;
        }

        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move {
            let state = inner.check().instrument(info_span!("check")).await;
            lock(&inner.busy).checking = false;
            state
        }))
    }

    /// Start downloading the build found by the last check.
    ///
    /// Returns `Ok(None)` while a check or update is already running and
    /// `InvalidOperation` when the last check did not find an outdated build.
    pub fn perform_update(&self) -> Result<Option<JoinHandle<UpdateOutcome>>> {
        {
            let mut busy = lock(&self.inner.busy);
            if busy.checking || busy.updating {
                debug!("Update requested while busy; ignored");
                return Ok(None);
            }
            busy.updating = true;
        }

        let target = {
            let last = lock(&self.inner.last_check);
            match (last.state, &last.remote, &last.mirror) {
                (BuildState::Outdated, Some(remote), Some(mirror)) => {
                    Some((Arc::clone(remote), mirror.clone()))
                }
                _ => None,
            }
        };
        let Some((remote, mirror)) = target else {
            lock(&self.inner.busy).updating = false;
            return Err(UpdateError::InvalidOperation(
                "no outdated build to update; check for updates first".into(),
            ));
        };

        let downloader = Arc::new(self.inner.new_downloader());
        *lock(&self.inner.active) = Some(Arc::clone(&downloader));

        let inner = Arc::clone(&self.inner);
        let span = info_span!("update", version = remote.version.number, mirror = %mirror.ui_name);
        Ok(Some(tokio::spawn(async move {
            let outcome = inner.update(remote, mirror, &downloader).instrument(span).await;
            *lock(&inner.active) = None;
            lock(&inner.busy).updating = false;
            outcome
        })))
    }

    /// Cancel the running update, if any.
    pub fn cancel_update(&self) {
        if let Some(downloader) = lock(&self.inner.active).as_ref() {
            info!("Cancelling update");
            downloader.cancel();
        }
    }
}

impl Inner {
    fn emit(&self, event: UpdateEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn read_local_manifest(&self) -> Option<LocalManifest> {
        let path = self.config.build_path.join(LOCAL_MANIFEST_FILE);
        if !path.exists() {
            return None;
        }
        match LocalManifest::parse(&path) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unable to read local manifest");
                None
            }
        }
    }

    fn record_check(&self, state: BuildState, remote: Option<Arc<RemoteManifest>>, mirror: Option<Mirror>) {
        *lock(&self.last_check) = CheckResult {
            state,
            remote,
            mirror,
        };
    }

    async fn check(&self) -> BuildState {
        let Some((mirror, remote)) = self.fetch_remote_manifest().await else {
            self.record_check(BuildState::CheckFailed, None, None);
            self.emit(UpdateEvent::CheckFailed);
            return BuildState::CheckFailed;
        };

        let local = self.read_local_manifest();
        let remote = Arc::new(remote);

        if local.as_ref().map(|l| l.version.number) == Some(remote.version.number) {
            info!(version = remote.version.number, "Build is up to date");
            self.record_check(BuildState::UpToDate, Some(remote), Some(mirror));
            self.emit(UpdateEvent::UpToDate);
            return BuildState::UpToDate;
        }

        let estimated_size = estimate_update_size(local.as_ref(), &remote);
        info!(
            local = ?local.as_ref().map(|l| l.version.number),
            remote = remote.version.number,
            estimated = %format_bytes(estimated_size),
            "Update available"
        );

        let display_string = remote.version.display_string.clone();
        self.record_check(BuildState::Outdated, Some(remote), Some(mirror));
        self.emit(UpdateEvent::Outdated {
            display_string,
            estimated_size,
        });
        BuildState::Outdated
    }

    /// Try mirrors by rating until one serves a parseable manifest.
    async fn fetch_remote_manifest(&self) -> Option<(Mirror, RemoteManifest)> {
        let staging = self.config.staging_path();
        let manifest_path = staging.join(REMOTE_MANIFEST_FILE);
        let mirrors = lock(&self.mirrors).ordered_by_rating();

        if mirrors.is_empty() {
            warn!("No update mirrors configured");
            return None;
        }

        for mirror in mirrors {
            let url = mirror.file_url(REMOTE_MANIFEST_FILE);
            debug!(mirror = %mirror.ui_name, %url, "Fetching remote manifest");

            if let Err(e) = self
                .transport
                .fetch(&url, &manifest_path, Arc::new(|_: u64| {}))
                .await
            {
                warn!(mirror = %mirror.ui_name, error = %e, "Unable to fetch remote manifest");
                continue;
            }

            match RemoteManifest::parse(&manifest_path) {
                Ok(remote) => {
                    info!(mirror = %mirror.ui_name, version = remote.version.number, "Remote manifest loaded");
                    return Some((mirror, remote));
                }
                Err(e) => {
                    warn!(mirror = %mirror.ui_name, error = %e, "Unable to parse remote manifest");
                }
            }
        }

        warn!("Every mirror failed");
        None
    }

    fn new_downloader(&self) -> Downloader {
        let events = self.events.clone();
        Downloader::new(Arc::clone(&self.transport), Arc::clone(&self.codec))
            .with_max_retries(self.config.max_retries)
            .with_verify_queue_capacity(self.config.verify_queue_capacity)
            .with_progress(Arc::new(move |progress: DownloadProgress| {
                let _ = events.send(UpdateEvent::DownloadProgress {
                    total_percent: progress.total_percent(),
                    file_percent: progress.file_percent(),
                    current_file: progress.current_file,
                });
            }))
    }

    async fn update(&self, remote: Arc<RemoteManifest>, mirror: Mirror, downloader: &Downloader) -> UpdateOutcome {
        let outcome = match self.download(&remote, &mirror, downloader).await {
            Ok(DownloadOutcome::Completed) => match self.finalize(&remote) {
                Ok(()) => UpdateOutcome::Completed,
                Err(e) => UpdateOutcome::Failed(e.to_string()),
            },
            Ok(DownloadOutcome::Failed(message)) => UpdateOutcome::Failed(message),
            Ok(DownloadOutcome::Cancelled) | Err(UpdateError::Cancelled) => UpdateOutcome::Cancelled,
            Err(e) => UpdateOutcome::Failed(e.to_string()),
        };

        match &outcome {
            UpdateOutcome::Completed => {
                info!("Update downloaded, second stage launched");
                self.emit(UpdateEvent::UpdateCompleted);
            }
            UpdateOutcome::Failed(message) => {
                warn!(%message, "Update failed");
                self.emit(UpdateEvent::UpdateFailed {
                    message: message.clone(),
                });
            }
            UpdateOutcome::Cancelled => {
                info!("Update cancelled");
                self.emit(UpdateEvent::UpdateCancelled);
            }
        }
        outcome
    }

    async fn download(
        &self,
        remote: &Arc<RemoteManifest>,
        mirror: &Mirror,
        downloader: &Downloader,
    ) -> Result<DownloadOutcome> {
        let staging = self.config.staging_path();
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| UpdateError::filesystem(&staging, e))?;

        self.emit(UpdateEvent::Preparing { percent: 0 });
        let plan = {
            let remote = Arc::clone(remote);
            let build = self.config.build_path.clone();
            let staging = staging.clone();
            let events = self.events.clone();
            tokio::task::spawn_blocking(move || {
                let mut last = 0;
                plan_downloads(&remote, &build, &staging, |done, total| {
                    let percent = (done * 100 / total.max(1)) as u8;
                    if percent != last {
                        last = percent;
                        let _ = events.send(UpdateEvent::Preparing { percent });
                    }
                })
            })
            .await
            .map_err(|e| UpdateError::InvalidOperation(format!("planning task failed: {}", e)))??
        };

        if downloader.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        sweep_staging(&staging, &plan, &[REMOTE_MANIFEST_FILE])?;

        info!(
            files = plan.entries.len(),
            size = %format_bytes(plan.total_download_size()),
            "Downloading update"
        );
        Ok(downloader.run(&plan, mirror, &staging).await)
    }

    /// Write the new local manifest, refresh the second stage and launch it.
    fn finalize(&self, remote: &RemoteManifest) -> Result<()> {
        let staging = self.config.staging_path();
        LocalManifest::from_remote(remote).write(&staging.join(LOCAL_MANIFEST_FILE))?;

        let config_path = self.prepare_second_stage(&staging)?;
        let executable = self.config.second_stage_executable();
        self.launcher.launch(&executable, &config_path)
    }

    /// Move a staged second stage (and its files) into place, since the
    /// second stage cannot replace itself. Returns the config path.
    fn prepare_second_stage(&self, staging: &Path) -> Result<PathBuf> {
        let build = &self.config.build_path;
        let executable = self.config.second_stage_path.clone();
        let config_relative = match executable.parent() {
            Some(dir) => dir.join(&self.config.second_stage_config),
            None => self.config.second_stage_config.clone(),
        };

        refresh_from_staging(staging, build, &executable)?;
        refresh_from_staging(staging, build, &config_relative)?;

        let config_path = build.join(&config_relative);
        let mut second_stage = if config_path.exists() {
            SecondStageConfig::from_file(&config_path)?
        } else {
            self.default_second_stage_config()?
        };

        for related in second_stage.related_files.clone() {
            refresh_from_staging(staging, build, &related)?;
        }

        second_stage.build_path = build.canonicalize().unwrap_or_else(|_| build.clone());
        second_stage.staging_dir = self.config.staging_dir.clone();
        second_stage.to_file(&config_path)?;
        Ok(config_path)
    }

    fn default_second_stage_config(&self) -> Result<SecondStageConfig> {
        let current = std::env::current_exe()?;
        let product = current
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| UpdateError::Config("unable to determine the product executable".into()))?;

        let wait = match &self.config.instance_guid {
            Some(guid) => WaitStrategy::Mutex { guid: guid.clone() },
            None => WaitStrategy::ProcessName {
                name: current
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            },
        };

        Ok(SecondStageConfig::new(&self.config.build_path, product, wait))
    }
}

/// Copy `relative` from staging over the installed file and drop the staged copy.
fn refresh_from_staging(staging: &Path, build: &Path, relative: &Path) -> Result<bool> {
    let staged = staging.join(relative);
    if !staged.is_file() {
        return Ok(false);
    }

    let target = build.join(relative);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| UpdateError::filesystem(parent, e))?;
    }
    std::fs::copy(&staged, &target).map_err(|e| UpdateError::filesystem(&target, e))?;
    std::fs::remove_file(&staged).map_err(|e| UpdateError::filesystem(&staged, e))?;

    info!(file = %relative.display(), "Second-stage file refreshed");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::RemoteFileRecord;
    use crate::transfer::ProgressCallback;
    use crate::utils::{FileHash, TransportError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Serves files from an in-memory map keyed by URL.
    #[derive(Default)]
    struct MapTransport {
        files: Mutex<HashMap<String, Vec<u8>>>,
        stalled: Mutex<Vec<String>>,
        entered_stall: tokio::sync::Notify,
    }

    impl MapTransport {
        fn serve(&self, url: &str, data: &[u8]) {
            self.files.lock().unwrap().insert(url.to_string(), data.to_vec());
        }

        /// Requests for `url` never finish
        fn stall(&self, url: &str) {
            self.stalled.lock().unwrap().push(url.to_string());
        }
    }

    #[async_trait]
    impl Transport for MapTransport {
        async fn fetch(
            &self,
            url: &str,
            destination: &Path,
            progress: ProgressCallback,
        ) -> std::result::Result<u64, TransportError> {
            if self.stalled.lock().unwrap().iter().any(|u| u == url) {
                self.entered_stall.notify_one();
                return std::future::pending().await;
            }
            let data = self.files.lock().unwrap().get(url).cloned().ok_or_else(|| {
                TransportError::Status {
                    status: 404,
                    url: url.to_string(),
                }
            })?;
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(destination, &data)?;
            progress(data.len() as u64);
            Ok(data.len() as u64)
        }
    }

    #[derive(Default)]
    struct RecordingLauncher {
        launches: Mutex<Vec<(PathBuf, PathBuf)>>,
    }

    impl HandoffLauncher for RecordingLauncher {
        fn launch(&self, executable: &Path, config: &Path) -> Result<()> {
            self.launches
                .lock()
                .unwrap()
                .push((executable.to_path_buf(), config.to_path_buf()));
            Ok(())
        }
    }

    struct Fixture {
        _temp: TempDir,
        build: PathBuf,
        transport: Arc<MapTransport>,
        launcher: Arc<RecordingLauncher>,
        updater: Updater,
    }

    fn fixture(mirrors: &[(&str, &str)]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let build = temp.path().join("game");
        fs::create_dir_all(&build).unwrap();

        let mut registry = MirrorRegistry::new();
        for (url, name) in mirrors {
            registry.add(url, name);
        }

        let transport = Arc::new(MapTransport::default());
        let launcher = Arc::new(RecordingLauncher::default());
        let mut config = Config::for_build(&build).updater;
        config.instance_guid = Some("test-guid".into());
        let updater = Updater::new(config, registry, transport.clone()).with_launcher(launcher.clone());

        Fixture {
            _temp: temp,
            build,
            transport,
            launcher,
            updater,
        }
    }

    fn remote_manifest(number: i32, files: &[(&str, &[u8])]) -> RemoteManifest {
        let mut manifest = RemoteManifest::new(VersionInfo::new(number, format!("v{}", number)));
        for (path, data) in files {
            manifest
                .add_file(RemoteFileRecord::new(*path, FileHash::of_bytes(data), data.len() as u64))
                .unwrap();
        }
        manifest
    }

    fn publish(transport: &MapTransport, base: &str, manifest: &RemoteManifest, files: &[(&str, &[u8])]) {
        transport.serve(
            &format!("{}/{}", base, REMOTE_MANIFEST_FILE),
            manifest.to_ini_string().unwrap().as_bytes(),
        );
        for (path, data) in files {
            transport.serve(&format!("{}/{}", base, path), data);
        }
    }

    #[tokio::test]
    async fn test_check_fails_over_to_next_mirror() {
        let f = fixture(&[("http://down.test", "Down"), ("http://up.test", "Up")]);
        let files: &[(&str, &[u8])] = &[("a.txt", b"alpha")];
        publish(&f.transport, "http://up.test", &remote_manifest(2, files), files);

        let mut events = f.updater.subscribe();
        let state = f.updater.check_for_updates().unwrap().await.unwrap();

        assert_eq!(state, BuildState::Outdated);
        assert_eq!(f.updater.remote_version().map(|v| v.number), Some(2));
        assert_eq!(
            events.recv().await.unwrap(),
            UpdateEvent::Outdated {
                display_string: "v2".into(),
                estimated_size: 5,
            }
        );
    }

    #[tokio::test]
    async fn test_check_fails_when_every_mirror_fails() {
        let f = fixture(&[("http://down.test", "Down")]);
        let mut events = f.updater.subscribe();

        let state = f.updater.check_for_updates().unwrap().await.unwrap();

        assert_eq!(state, BuildState::CheckFailed);
        assert_eq!(events.recv().await.unwrap(), UpdateEvent::CheckFailed);
    }

    #[tokio::test]
    async fn test_equal_versions_are_up_to_date() {
        let f = fixture(&[("http://up.test", "Up")]);
        let remote = remote_manifest(4, &[]);
        publish(&f.transport, "http://up.test", &remote, &[]);
        LocalManifest::from_remote(&remote)
            .write(&f.build.join(LOCAL_MANIFEST_FILE))
            .unwrap();

        let state = f.updater.check_for_updates().unwrap().await.unwrap();

        assert_eq!(state, BuildState::UpToDate);
        assert_eq!(f.updater.local_version_display().as_deref(), Some("v4"));
    }

    #[tokio::test]
    async fn test_update_requires_outdated_check() {
        let f = fixture(&[("http://up.test", "Up")]);
        let err = f.updater.perform_update().unwrap_err();
        assert!(matches!(err, UpdateError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_update_downloads_and_launches_second_stage() {
        let f = fixture(&[("http://up.test", "Up")]);
        let files: &[(&str, &[u8])] = &[("a.txt", b"alpha"), ("Data/b.txt", b"beta")];
        publish(&f.transport, "http://up.test", &remote_manifest(2, files), files);
        fs::write(f.build.join("a.txt"), b"alpha").unwrap();

        f.updater.check_for_updates().unwrap().await.unwrap();
        let outcome = f.updater.perform_update().unwrap().unwrap().await.unwrap();

        assert_eq!(outcome, UpdateOutcome::Completed);

        let staging = f.build.join("Updater");
        assert_eq!(fs::read(staging.join("Data/b.txt")).unwrap(), b"beta");
        assert!(!staging.join("a.txt").exists());

        let staged_local = LocalManifest::parse(&staging.join(LOCAL_MANIFEST_FILE)).unwrap();
        assert_eq!(staged_local.version.number, 2);
        assert_eq!(staged_local.files.len(), 2);

        let launches = f.launcher.launches.lock().unwrap();
        assert_eq!(launches.len(), 1);
        let second_stage = SecondStageConfig::from_file(&launches[0].1).unwrap();
        assert_eq!(
            second_stage.wait,
            WaitStrategy::Mutex {
                guid: "test-guid".into()
            }
        );
    }

    #[tokio::test]
    async fn test_failed_update_can_be_retried() {
        let f = fixture(&[("http://up.test", "Up")]);
        let files: &[(&str, &[u8])] = &[("a.txt", b"alpha")];
        // Manifest only; the file itself is missing from the mirror
        publish(&f.transport, "http://up.test", &remote_manifest(2, files), &[]);

        f.updater.check_for_updates().unwrap().await.unwrap();
        let mut events = f.updater.subscribe();
        let outcome = f.updater.perform_update().unwrap().unwrap().await.unwrap();

        assert!(matches!(outcome, UpdateOutcome::Failed(_)));
        assert_eq!(f.updater.build_state(), BuildState::Outdated);

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            saw_failure |= matches!(event, UpdateEvent::UpdateFailed { .. });
        }
        assert!(saw_failure);

        f.transport.serve("http://up.test/a.txt", b"alpha");
        let outcome = f.updater.perform_update().unwrap().unwrap().await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Completed);
    }

    #[tokio::test]
    async fn test_busy_requests_are_ignored() {
        let f = fixture(&[("http://up.test", "Up")]);
        publish(&f.transport, "http://up.test", &remote_manifest(2, &[]), &[]);

        let first = f.updater.check_for_updates();
        let second = f.updater.check_for_updates();
        let update = f.updater.perform_update().unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert!(update.is_none());
        first.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_staged_second_stage_is_applied() {
        let f = fixture(&[("http://up.test", "Up")]);
        let second_stage_name = f.updater.config().second_stage_path.to_string_lossy().into_owned();
        let files: Vec<(&str, &[u8])> = vec![(second_stage_name.as_str(), b"new second stage" as &[u8])];
        publish(&f.transport, "http://up.test", &remote_manifest(2, &files), &files);

        f.updater.check_for_updates().unwrap().await.unwrap();
        let outcome = f.updater.perform_update().unwrap().unwrap().await.unwrap();

        assert_eq!(outcome, UpdateOutcome::Completed);
        assert_eq!(
            fs::read(f.build.join(&second_stage_name)).unwrap(),
            b"new second stage"
        );
        assert!(!f.build.join("Updater").join(&second_stage_name).exists());
    }

    #[tokio::test]
    async fn test_mirror_rating_changes_check_order() {
        let f = fixture(&[("http://first.test", "First"), ("http://second.test", "Second")]);
        publish(&f.transport, "http://first.test", &remote_manifest(2, &[]), &[]);
        publish(&f.transport, "http://second.test", &remote_manifest(3, &[]), &[]);

        f.updater.set_mirror_rating(0, 10);
        f.updater.check_for_updates().unwrap().await.unwrap();

        assert_eq!(f.updater.remote_version().map(|v| v.number), Some(3));
    }

    #[tokio::test]
    async fn test_cancel_update_during_download() {
        let f = fixture(&[("http://up.test", "Up")]);
        let files: &[(&str, &[u8])] = &[("a.txt", b"alpha")];
        publish(&f.transport, "http://up.test", &remote_manifest(2, files), &[]);
        f.transport.stall("http://up.test/a.txt");

        f.updater.check_for_updates().unwrap().await.unwrap();
        let mut events = f.updater.subscribe();
        let handle = f.updater.perform_update().unwrap().unwrap();

        f.transport.entered_stall.notified().await;
        f.updater.cancel_update();

        assert_eq!(handle.await.unwrap(), UpdateOutcome::Cancelled);
        assert_eq!(f.updater.build_state(), BuildState::Outdated);
        assert!(f.launcher.launches.lock().unwrap().is_empty());

        let mut saw_cancel = false;
        while let Ok(event) = events.try_recv() {
            saw_cancel |= event == UpdateEvent::UpdateCancelled;
        }
        assert!(saw_cancel);
    }
}
