//! End-to-end: publish a build, update an installed copy through a mirror
//! served from disk, then apply it with the second-stage handoff.

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::mpsc;
use update_engine::codec::ZstdCodec;
use update_engine::config::Config;
use update_engine::handoff::{Handoff, SecondStageConfig};
use update_engine::manifest::{LocalManifest, VersionInfo, LOCAL_MANIFEST_FILE};
use update_engine::mirror::MirrorRegistry;
use update_engine::publish::{publish_build, PublishOptions};
use update_engine::transfer::{ProgressCallback, Transport};
use update_engine::{BuildState, HandoffLauncher, TransportError, UpdateEvent, UpdateOutcome, Updater};

const MIRROR_URL: &str = "file-mirror://builds/";

/// Serves a mirror directory for URLs under `MIRROR_URL`.
struct DirectoryTransport {
    root: PathBuf,
}

#[async_trait]
impl Transport for DirectoryTransport {
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: ProgressCallback,
    ) -> Result<u64, TransportError> {
        let relative = url.strip_prefix(MIRROR_URL).ok_or_else(|| TransportError::Status {
            status: 404,
            url: url.to_string(),
        })?;
        let data = tokio::fs::read(self.root.join(relative)).await?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, &data).await?;
        progress(data.len() as u64);
        Ok(data.len() as u64)
    }
}

#[derive(Default)]
struct CapturingLauncher {
    config: Mutex<Option<PathBuf>>,
}

impl HandoffLauncher for CapturingLauncher {
    fn launch(&self, _executable: &Path, config: &Path) -> update_engine::Result<()> {
        *self.config.lock().unwrap() = Some(config.to_path_buf());
        Ok(())
    }
}

fn write(root: &Path, relative: &str, data: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

#[tokio::test]
async fn test_update_round_trip() {
    let temp = TempDir::new().unwrap();
    let release = temp.path().join("release");
    let mirror = temp.path().join("mirror");
    let installed = temp.path().join("installed");

    // New release: one changed file, one renamed file, one new compressible file
    write(&release, "game.dat", b"version two");
    write(&release, "Maps/renamed.map", b"map contents");
    write(&release, "Data/big.bin", &vec![7u8; 20_000]);
    write(
        &release,
        "Migrations.ini",
        b"[DropOldMap]\nMaximumVersion=2\n0=DeleteFile:Maps/legacy.map\n1=DeleteDirectoryIfEmpty:Old\n",
    );

    publish_build(
        &release,
        &mirror,
        VersionInfo::new(2, "Release 2"),
        &PublishOptions::default(),
        &ZstdCodec::default(),
    )
    .unwrap();
    assert!(mirror.join("Data/big.bin.lzma").exists());

    // Installed version 1
    write(&installed, "game.dat", b"version one");
    write(&installed, "Maps/legacy.map", b"map contents");
    fs::create_dir_all(installed.join("Old")).unwrap();
    let mut local = LocalManifest::new(VersionInfo::new(1, "Release 1"));
    local
        .add_file(update_engine::manifest::LocalFileRecord::new(
            "game.dat",
            update_engine::utils::FileHash::of_bytes(b"version one"),
            11,
        ))
        .unwrap();
    local.write(&installed.join(LOCAL_MANIFEST_FILE)).unwrap();

    // Primary: check and download
    let mut registry = MirrorRegistry::new();
    registry.add(MIRROR_URL, "Local disk");
    let launcher = Arc::new(CapturingLauncher::default());
    let updater = Updater::new(
        Config::for_build(&installed).updater,
        registry,
        Arc::new(DirectoryTransport { root: mirror.clone() }),
    )
    .with_launcher(launcher.clone());

    let mut events = updater.subscribe();
    assert_eq!(updater.local_version_display().as_deref(), Some("Release 1"));
    assert_eq!(
        updater.check_for_updates().unwrap().await.unwrap(),
        BuildState::Outdated
    );
    let outcome = updater.perform_update().unwrap().unwrap().await.unwrap();
    assert_eq!(outcome, UpdateOutcome::Completed);

    let mut seen_progress = false;
    let mut seen_completed = false;
    loop {
        match events.try_recv() {
            Ok(UpdateEvent::DownloadProgress { .. }) => seen_progress = true,
            Ok(UpdateEvent::UpdateCompleted) => seen_completed = true,
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    assert!(seen_progress);
    assert!(seen_completed);

    // The renamed map was reused from the installed tree, not downloaded
    let staging = installed.join("Updater");
    assert_eq!(fs::read(staging.join("Maps/renamed.map")).unwrap(), b"map contents");
    assert!(!staging.join("Data/big.bin.lzma").exists());

    // Second stage: apply
    let config_path = launcher.config.lock().unwrap().clone().unwrap();
    let mut config = SecondStageConfig::from_file(&config_path).unwrap();
    config.settle_delay_secs = 0;
    config.wait = update_engine::handoff::WaitStrategy::ProcessName {
        name: format!("no-such-process-{}", std::process::id()),
    };

    let handoff = Handoff::new(config);
    let (tx, _rx) = mpsc::unbounded_channel();
    let (_decide, decisions) = mpsc::channel(1);
    let report = handoff.run(tx, decisions).await.unwrap();

    assert_eq!(report.previous_version, 1);
    assert_eq!(report.migrations_run, 1);
    assert_eq!(fs::read(installed.join("game.dat")).unwrap(), b"version two");
    assert_eq!(fs::read(installed.join("Data/big.bin")).unwrap(), vec![7u8; 20_000]);
    assert!(installed.join("Maps/renamed.map").exists());
    assert!(!installed.join("Maps/legacy.map").exists());
    assert!(!installed.join("Old").exists());
    assert!(!staging.exists());

    let updated = LocalManifest::parse(&installed.join(LOCAL_MANIFEST_FILE)).unwrap();
    assert_eq!(updated.version.number, 2);

    // Nothing left to do
    let updater = Updater::new(
        Config::for_build(&installed).updater,
        {
            let mut registry = MirrorRegistry::new();
            registry.add(MIRROR_URL, "Local disk");
            registry
        },
        Arc::new(DirectoryTransport { root: mirror }),
    );
    assert_eq!(
        updater.check_for_updates().unwrap().await.unwrap(),
        BuildState::UpToDate
    );
}
