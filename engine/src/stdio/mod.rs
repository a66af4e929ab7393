//! Per-container stdio plumbing: durable file sinks plus a broadcast
//! writer that live attach clients subscribe to.

pub use broadcast::{BroadcastWriter, Subscriber};

pub mod broadcast;

use std::{collections::HashMap, io, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

use crate::vm::OutputSink;

/// One output stream of a container: the log file and the broadcast
/// fan-out. Concurrent writes to the file are serialised by its lock.
pub struct StreamSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
    broadcast: BroadcastWriter,
}

impl StreamSink {
    async fn open(path: PathBuf, truncate: bool) -> io::Result<StreamSink> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(truncate)
            .append(!truncate)
            .open(&path)
            .await?;
        Ok(StreamSink {
            path,
            file: tokio::sync::Mutex::new(file),
            broadcast: BroadcastWriter::new(),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn broadcast(&self) -> &BroadcastWriter {
        &self.broadcast
    }
}

#[async_trait]
impl OutputSink for StreamSink {
    async fn write(&self, buf: &[u8]) {
        {
            let mut file = self.file.lock().await;
            // write-through so `logs` sees bytes as the guest emits them
            let written = match file.write_all(buf).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            };
            if let Err(error) = written {
                warn!(path = %self.path.display(), %error, "log file write failed");
            }
        }
        self.broadcast.write(buf).await;
    }

    async fn close(&self) {
        let mut file = self.file.lock().await;
        if let Err(error) = file.flush().await {
            warn!(path = %self.path.display(), %error, "log file flush failed");
        }
        drop(file);
        self.broadcast.close_subscribers().await;
    }
}

/// Both streams of one container.
pub struct ContainerStreams {
    pub stdout: Arc<StreamSink>,
    pub stderr: Arc<StreamSink>,
}

/// Registry of per-container stdio sinks. Writers are ephemeral runtime
/// state; after a daemon restart the files are re-registered, never
/// truncated.
pub struct LogFanout {
    root: PathBuf,
    inner: Mutex<HashMap<String, Arc<ContainerStreams>>>,
}

impl LogFanout {
    pub fn new(root: PathBuf) -> LogFanout {
        LogFanout {
            root,
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn dir(&self, container_id: &str) -> PathBuf {
        self.root.join(container_id)
    }

    /// Log file paths for a container, whether or not writers exist.
    pub fn paths(&self, container_id: &str) -> (PathBuf, PathBuf) {
        let dir = self.dir(container_id);
        (dir.join("stdout.log"), dir.join("stderr.log"))
    }

    async fn open(
        &self,
        container_id: &str,
        truncate: bool,
    ) -> io::Result<Arc<ContainerStreams>> {
        if let Some(existing) = self.streams(container_id) {
            return Ok(existing);
        }
        let dir = self.dir(container_id);
        tokio::fs::create_dir_all(&dir).await?;
        let (stdout_path, stderr_path) = self.paths(container_id);
        let streams = Arc::new(ContainerStreams {
            stdout: Arc::new(StreamSink::open(stdout_path, truncate).await?),
            stderr: Arc::new(StreamSink::open(stderr_path, truncate).await?),
        });
        self.inner
            .lock()
            .insert(container_id.to_string(), streams.clone());
        Ok(streams)
    }

    /// Create fresh log files for a new container.
    pub async fn create(
        &self,
        container_id: &str,
    ) -> io::Result<Arc<ContainerStreams>> {
        self.open(container_id, true).await
    }

    /// Re-register the log files of a recovered container, appending.
    pub async fn reregister(
        &self,
        container_id: &str,
    ) -> io::Result<Arc<ContainerStreams>> {
        self.open(container_id, false).await
    }

    pub fn streams(&self, container_id: &str) -> Option<Arc<ContainerStreams>> {
        self.inner.lock().get(container_id).cloned()
    }

    /// Attach a live subscriber pair; safe on a running container.
    pub async fn subscribe(
        &self,
        container_id: &str,
        stdout: Option<broadcast::Subscriber>,
        stderr: Option<broadcast::Subscriber>,
    ) -> bool {
        let Some(streams) = self.streams(container_id) else {
            return false;
        };
        if let Some(w) = stdout {
            streams.stdout.broadcast.subscribe(w).await;
        }
        if let Some(w) = stderr {
            streams.stderr.broadcast.subscribe(w).await;
        }
        true
    }

    /// Drop the writers and delete the log directory.
    pub async fn remove(&self, container_id: &str) {
        let streams = self.inner.lock().remove(container_id);
        if let Some(streams) = streams {
            streams.stdout.close().await;
            streams.stderr.close().await;
        }
        if let Err(error) =
            tokio::fs::remove_dir_all(self.dir(container_id)).await
        {
            if error.kind() != io::ErrorKind::NotFound {
                warn!(container = container_id, %error, "failed to delete log files");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn files_are_created_and_appended_to() {
        let dir = tempfile::tempdir().unwrap();
        let fanout = LogFanout::new(dir.path().to_path_buf());

        let streams = fanout.create("c1").await.unwrap();
        streams.stdout.write(b"hello ").await;
        streams.stdout.write(b"world\n").await;
        streams.stdout.close().await;

        let (stdout_path, _) = fanout.paths("c1");
        let content = std::fs::read_to_string(&stdout_path).unwrap();
        assert_eq!(content, "hello world\n");
    }

    #[tokio::test]
    async fn reregister_preserves_history() {
        let dir = tempfile::tempdir().unwrap();
        let stdout_path = dir.path().join("c1").join("stdout.log");
        {
            let fanout = LogFanout::new(dir.path().to_path_buf());
            let streams = fanout.create("c1").await.unwrap();
            streams.stdout.write(b"before\n").await;
            streams.stdout.close().await;
        }

        let fanout = LogFanout::new(dir.path().to_path_buf());
        let streams = fanout.reregister("c1").await.unwrap();
        streams.stdout.write(b"after\n").await;
        streams.stdout.close().await;

        let content = std::fs::read_to_string(&stdout_path).unwrap();
        assert_eq!(content, "before\nafter\n");
    }

    #[tokio::test]
    async fn remove_deletes_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let fanout = LogFanout::new(dir.path().to_path_buf());
        fanout.create("c1").await.unwrap();
        assert!(dir.path().join("c1").exists());

        fanout.remove("c1").await;
        assert!(!dir.path().join("c1").exists());
        assert!(fanout.streams("c1").is_none());
    }
}
