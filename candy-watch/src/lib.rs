//! Host-root filesystem watcher
//!
//! Watches the host-root directory non-recursively and invokes a callback on
//! every meaningful change. Removal of the host root itself is fatal: it is
//! the signal that the installation is gone and the server must shut down.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher as _};
use tokio_util::sync::CancellationToken;

use candy_core::error::{Error, Result};
use candy_core::Runnable;

/// Callback invoked once per observed change.
///
/// Runs on the watcher's task; while it is pending, further events queue in
/// the subscription channel.
pub type HandleFunc = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Configuration for [`Watcher`]
#[derive(Clone)]
pub struct Config {
    /// Directory to watch, non-recursively
    pub host_root: PathBuf,

    /// Invoked once per meaningful event
    pub handler: HandleFunc,
}

/// Filesystem watcher worker.
pub struct Watcher {
    cfg: Config,
}

impl Watcher {
    pub fn new(cfg: Config) -> Self {
        Self { cfg }
    }
}

#[async_trait::async_trait]
impl Runnable for Watcher {
    fn name(&self) -> &'static str {
        "watcher"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let root = self.cfg.host_root.clone();
        if !root.exists() {
            return Err(Error::Watch(format!(
                "host root {} does not exist",
                root.display()
            )));
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = tx.send(event);
        })
        .map_err(|err| Error::Watch(err.to_string()))?;
        watcher
            .watch(&root, RecursiveMode::NonRecursive)
            .map_err(|err| Error::Watch(err.to_string()))?;

        tracing::info!(host_root = %root.display(), "starting watcher");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("shutting down watcher");
                    return Ok(());
                }
                event = rx.recv() => match event {
                    None => return Ok(()),
                    Some(Err(err)) => return Err(Error::Watch(err.to_string())),
                    Some(Ok(event)) => {
                        if !is_meaningful(&event.kind) {
                            continue;
                        }
                        if is_root_removal(&event, &root) {
                            return Err(Error::HostRootRemoved(root.display().to_string()));
                        }

                        tracing::info!(
                            dir = %root.display(),
                            files = ?event.paths,
                            op = ?event.kind,
                            "watched dir changed"
                        );
                        (self.cfg.handler)().await;
                    }
                }
            }
        }
    }
}

/// Metadata-only and close notifications carry no content change.
fn is_meaningful(kind: &EventKind) -> bool {
    !matches!(
        kind,
        EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_)
    )
}

fn is_root_removal(event: &Event, root: &Path) -> bool {
    matches!(event.kind, EventKind::Remove(_)) && event.paths.iter().any(|path| path == root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn watcher_with_events(root: &Path) -> (Watcher, tokio::sync::mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handler: HandleFunc = Arc::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(());
            })
        });
        (
            Watcher::new(Config {
                host_root: root.to_path_buf(),
                handler,
            }),
            rx,
        )
    }

    #[tokio::test]
    async fn missing_root_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (watcher, _rx) = watcher_with_events(&dir.path().join("gone"));

        let result = watcher.run(CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn invokes_handler_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let (watcher, mut rx) = watcher_with_events(dir.path());

        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let task = tokio::spawn(async move { watcher.run(run_cancel).await });

        tokio::time::sleep(Duration::from_millis(250)).await;
        fs::write(dir.path().join("app"), "8080").unwrap();

        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("handler was not invoked")
            .unwrap();

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn root_removal_is_fatal() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("host-root");
        fs::create_dir(&root).unwrap();

        let (watcher, _rx) = watcher_with_events(&root);
        let task = tokio::spawn({
            let cancel = CancellationToken::new();
            async move { watcher.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        fs::remove_dir_all(&root).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("watcher did not terminate")
            .unwrap();
        let err = result.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("host root {} was removed", root.display())
        );
    }
}
