//! Waiting for the primary application to exit.

use std::time::Duration;
use sysinfo::System;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::config::WaitStrategy;
use crate::instance;
use crate::utils::{Result, UpdateError};

const MUTEX_POLL_INTERVAL: Duration = Duration::from_millis(250);
const PROCESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Block the calling task until the primary has exited or `cancel` fires.
///
/// Returns immediately when the primary is already gone.
pub async fn wait_for_primary(strategy: &WaitStrategy, cancel: &CancellationToken) -> Result<()> {
    let strategy = strategy.clone();
    let token = cancel.clone();

    let waiting = tokio::task::spawn_blocking(move || match &strategy {
        WaitStrategy::Mutex { guid } => wait_for_lock_release(guid, MUTEX_POLL_INTERVAL, &token),
        WaitStrategy::ProcessName { name } => {
            wait_for_process_exit(name, PROCESS_POLL_INTERVAL, &token)
        }
    });

    waiting
        .await
        .map_err(|e| UpdateError::InvalidOperation(format!("wait task failed: {}", e)))?
}

fn wait_for_lock_release(guid: &str, interval: Duration, cancel: &CancellationToken) -> Result<()> {
    info!(guid, "Waiting for the application to release its instance lock");
    loop {
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        if !instance::is_held(guid)? {
            info!("Instance lock released");
            return Ok(());
        }
        std::thread::sleep(interval);
    }
}

fn wait_for_process_exit(name: &str, interval: Duration, cancel: &CancellationToken) -> Result<()> {
    info!(process = name, "Waiting for the application process to exit");
    let mut system = System::new();
    loop {
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        system.refresh_processes();
        if !is_running(&system, name) {
            info!(process = name, "Application process exited");
            return Ok(());
        }
        debug!(process = name, "Still running");
        std::thread::sleep(interval);
    }
}

fn is_running(system: &System, name: &str) -> bool {
    system
        .processes()
        .values()
        .any(|process| process_name_matches(process.name(), name))
}

/// Compare process names case-insensitively, ignoring an `.exe` suffix.
fn process_name_matches(candidate: &str, wanted: &str) -> bool {
    fn stem(name: &str) -> &str {
        let split = name.len().checked_sub(4).filter(|&i| i > 0);
        match split.and_then(|i| name.get(i..).map(|ext| (i, ext))) {
            Some((i, ext)) if ext.eq_ignore_ascii_case(".exe") => &name[..i],
            _ => name,
        }
    }
    stem(candidate).eq_ignore_ascii_case(stem(wanted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceGuard;

    #[test]
    fn test_process_name_matching() {
        assert!(process_name_matches("Game.exe", "game"));
        assert!(process_name_matches("game", "GAME.EXE"));
        assert!(!process_name_matches("game-launcher", "game"));
    }

    #[tokio::test]
    async fn test_absent_process_returns_immediately() {
        let strategy = WaitStrategy::ProcessName {
            name: format!("no-such-process-{}", std::process::id()),
        };
        wait_for_primary(&strategy, &CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_released_lock_returns_immediately() {
        let strategy = WaitStrategy::Mutex {
            guid: format!("update-engine-wait-free-{}", std::process::id()),
        };
        wait_for_primary(&strategy, &CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_waits_until_guard_dropped() {
        let guid = format!("update-engine-wait-held-{}", std::process::id());
        let guard = InstanceGuard::acquire(&guid).unwrap();
        let strategy = WaitStrategy::Mutex { guid };

        let waiter = tokio::spawn(async move {
            wait_for_primary(&strategy, &CancellationToken::new()).await
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_waiting() {
        let guid = format!("update-engine-wait-cancel-{}", std::process::id());
        let _guard = InstanceGuard::acquire(&guid).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = wait_for_primary(&WaitStrategy::Mutex { guid }, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::Cancelled));
    }
}
