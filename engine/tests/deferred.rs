//! Deferred creation and attach multiplexing.

pub mod common;

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::io::AsyncWrite;

use arca_engine::core::{AttachStreams, ContainerState, CreateOpts};
use common::TestHarness;

#[derive(Clone, Default)]
struct Recorder {
    data: Arc<Mutex<Vec<u8>>>,
}

impl AsyncWrite for Recorder {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.data.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn interactive_opts(name: &str, command: &[&str]) -> CreateOpts {
    CreateOpts {
        attach_stdin: true,
        attach_stdout: true,
        attach_stderr: true,
        open_stdin: true,
        ..TestHarness::opts(name, command)
    }
}

#[tokio::test]
async fn interactive_create_defers_the_vm() {
    let h = TestHarness::new().await;
    let id = h
        .core
        .create(interactive_opts("tty", &["cat"]))
        .await
        .unwrap();

    // no VM yet, but the record and the log writers exist
    assert_eq!(h.launcher.launch_count(), 0);
    let stored = h
        .store
        .get_container(id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.needs_create);
    let (stdout_path, _) = h.core.log_paths(id.as_str()).await.unwrap();
    assert!(stdout_path.exists());

    // the first start materialises it
    h.core.start(id.as_str()).await.unwrap();
    assert_eq!(h.launcher.launch_count(), 1);
    let stored = h
        .store
        .get_container(id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.needs_create);
}

#[tokio::test]
async fn attach_handles_route_stdio_and_signal_exit() {
    let h = TestHarness::new().await;
    let id = h
        .core
        .create(interactive_opts("interactive", &["cat"]))
        .await
        .unwrap();

    let stdout = Recorder::default();
    let waiter = h
        .core
        .register_attach(
            id.as_str(),
            AttachStreams {
                stdin: Some(Box::new(&b"piped through\n"[..])),
                stdout: Some(Box::new(stdout.clone())),
                stderr: None,
            },
        )
        .await
        .unwrap();

    h.core.start(id.as_str()).await.unwrap();

    // the guest (cat) copies stdin to stdout and exits on EOF; the
    // monitor yields the exit code to the waiter
    let code = tokio::time::timeout(Duration::from_secs(5), waiter.wait())
        .await
        .expect("exit signal fired")
        .expect("signal carries the code");
    assert_eq!(code, 0);

    assert_eq!(stdout.data.lock().as_slice(), b"piped through\n");
    assert_eq!(
        h.core.inspect(id.as_str()).await.unwrap().state,
        ContainerState::Exited
    );

    // the attach subscribers were closed on exit
    let (stdout_path, _) = h.core.log_paths(id.as_str()).await.unwrap();
    let logged = std::fs::read_to_string(&stdout_path).unwrap();
    assert_eq!(logged, "piped through\n");
}

#[tokio::test]
async fn dynamic_subscription_sees_later_output() {
    let h = TestHarness::new().await;
    let id = h
        .core
        .create(interactive_opts("follow", &["cat"]))
        .await
        .unwrap();

    let early = Recorder::default();
    let waiter = h
        .core
        .register_attach(
            id.as_str(),
            AttachStreams {
                stdin: Some(Box::new(&b"line\n"[..])),
                stdout: Some(Box::new(early.clone())),
                stderr: None,
            },
        )
        .await
        .unwrap();

    h.core.start(id.as_str()).await.unwrap();
    assert!(tokio::time::timeout(Duration::from_secs(5), waiter.wait())
        .await
        .is_ok());

    assert_eq!(early.data.lock().as_slice(), b"line\n");
}
