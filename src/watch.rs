//! Re-parses the leases file whenever dhcpd writes to it.
//!
//! Notifications feed a single-slot queue: while one parse is running, any
//! number of further writes collapse into one follow-up parse. Parses never
//! overlap, so the published table always comes from the newest completed
//! read.

use std::path::{Path, PathBuf};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::leases::reload_leases;
use crate::settings::Settings;

/// Watches one leases file and republishes its table into [`Settings`].
pub struct LeaseWatcher {
    trigger: mpsc::Sender<()>,
    handle: JoinHandle<()>,
    _watcher: RecommendedWatcher,
}

/// Queues a parse unless one is already waiting.
fn schedule(trigger: &mpsc::Sender<()>) {
    match trigger.try_send(()) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(())) => debug!("Lease reload already queued"),
        Err(mpsc::error::TrySendError::Closed(())) => {}
    }
}

fn is_same_file(candidate: &Path, target: &Path) -> bool {
    candidate == target || candidate.file_name() == target.file_name()
}

impl LeaseWatcher {
    /// Starts watching `path` and queues an initial parse.
    ///
    /// The parent directory is watched so that dhcpd's rename-over-write of
    /// the leases file is still seen. Must be called inside a Tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>, settings: Settings) -> Result<Self> {
        let path = path.into();
        let directory = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();

        let (trigger, mut queue) = mpsc::channel::<()>(1);

        let watched = path.clone();
        let notifier = trigger.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify()
                        && event.paths.iter().any(|p| is_same_file(p, &watched))
                    {
                        schedule(&notifier);
                    }
                }
                Err(e) => {
                    error!("Watch error: {}", e);
                }
            })?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;
        info!("Watching {}", path.display());

        let handle = tokio::spawn(async move {
            while queue.recv().await.is_some() {
                if let Err(e) = reload_leases(&path, &settings).await {
                    warn!("Lease reload failed: {}", e);
                }
            }
        });

        schedule(&trigger);

        Ok(Self {
            trigger,
            handle,
            _watcher: watcher,
        })
    }

    /// Requests a parse as if the file had changed.
    pub fn trigger(&self) {
        schedule(&self.trigger);
    }

    /// Stops watching and waits for an in-flight parse to finish.
    pub async fn shutdown(self) {
        let Self {
            trigger,
            handle,
            _watcher,
        } = self;
        drop(_watcher);
        drop(trigger);
        if let Err(e) = handle.await {
            warn!("Lease watcher task ended abnormally: {}", e);
        }
    }
}
