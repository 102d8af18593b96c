//! Single-instance routing.
//!
//! The first process takes an exclusive `flock` on `instance.lock` and
//! listens on `instance.sock`. A later process fails the lock, forwards its
//! argv over the socket as one newline-delimited JSON [`ForwardRequest`],
//! waits for the [`ForwardResponse`], and exits.
//!
//! The lock dies with the process, so a crashed primary never strands the
//! next launch; a leftover socket file is removed before binding.

use crate::activation::find_activation_arg;
use crate::error::{OverlayError, Result};
use overlay_protocol::{ForwardRequest, ForwardResponse};
use std::path::{Path, PathBuf};

/// Handles one forwarded activation in the primary process.
pub trait ForwardHandler: Send + Sync + 'static {
    fn handle(&self, request: ForwardRequest) -> ForwardResponse;
}

impl<F> ForwardHandler for F
where
    F: Fn(ForwardRequest) -> ForwardResponse + Send + Sync + 'static,
{
    fn handle(&self, request: ForwardRequest) -> ForwardResponse {
        self(request)
    }
}

pub enum InstanceRole {
    /// This process owns the lock and should run the app.
    Primary(PrimaryInstance),
    /// Another process already runs; forward and exit.
    Secondary { socket_path: PathBuf },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Unix
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(unix)]
mod imp {
    use super::*;
    use overlay_protocol::{parse_forward_request, ErrorInfo, MAX_REQUEST_BYTES};
    use std::io::{Read, Write};
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const READ_TIMEOUT: Duration = Duration::from_secs(2);
    const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
    const READ_CHUNK_SIZE: usize = 4096;

    /// Lock and listener of the running instance. Dropping it releases the
    /// lock and removes the socket file.
    pub struct PrimaryInstance {
        _lock: fs_err::File,
        listener: Option<UnixListener>,
        socket_path: PathBuf,
    }

    pub fn acquire(lock_path: &Path, socket_path: &Path) -> Result<InstanceRole> {
        if let Some(parent) = lock_path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| OverlayError::io("creating instance directory", err))?;
        }
        let lock = fs_err::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path)
            .map_err(|err| OverlayError::io("opening instance lock", err))?;

        // SAFETY: flock on a descriptor we own; the non-blocking flag keeps
        // this from waiting on the other process.
        let locked =
            unsafe { libc::flock(lock.file().as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0;
        if !locked {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                tracing::info!(path = %lock_path.display(), "Another instance holds the lock");
                return Ok(InstanceRole::Secondary {
                    socket_path: socket_path.to_path_buf(),
                });
            }
            return Err(OverlayError::InstanceLock(format!(
                "flock on {} failed: {}",
                lock_path.display(),
                err
            )));
        }

        if socket_path.exists() {
            fs_err::remove_file(socket_path)
                .map_err(|err| OverlayError::io("removing stale instance socket", err))?;
        }
        let listener = UnixListener::bind(socket_path)
            .map_err(|err| OverlayError::io("binding instance socket", err))?;

        tracing::info!(path = %socket_path.display(), "Primary instance");
        Ok(InstanceRole::Primary(PrimaryInstance {
            _lock: lock,
            listener: Some(listener),
            socket_path: socket_path.to_path_buf(),
        }))
    }

    impl PrimaryInstance {
        pub fn socket_path(&self) -> &Path {
            &self.socket_path
        }

        /// Accepts forwarded activations on a background thread, one thread
        /// per connection. Call once; later calls do nothing.
        pub fn serve<H: ForwardHandler>(&mut self, handler: H) {
            let Some(listener) = self.listener.take() else {
                return;
            };
            let handler = Arc::new(handler);
            thread::spawn(move || {
                for stream in listener.incoming() {
                    match stream {
                        Ok(stream) => {
                            let handler = Arc::clone(&handler);
                            thread::spawn(move || handle_connection(stream, handler.as_ref()));
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "Failed to accept instance connection");
                        }
                    }
                }
            });
        }
    }

    impl Drop for PrimaryInstance {
        fn drop(&mut self) {
            let _ = fs_err::remove_file(&self.socket_path);
        }
    }

    fn handle_connection<H: ForwardHandler + ?Sized>(mut stream: UnixStream, handler: &H) {
        let response = match read_request(&mut stream) {
            Ok(request) => {
                tracing::debug!(args = request.args.len(), "Forwarded activation received");
                handler.handle(request)
            }
            Err(err) => {
                tracing::warn!(code = %err.code, message = %err.message, "Bad forward request");
                ForwardResponse::error_with_info(err)
            }
        };
        if let Err(err) = write_line(&mut stream, &response) {
            tracing::debug!(error = %err, "Failed to reply to forwarding instance");
        }
    }

    fn read_request(stream: &mut UnixStream) -> std::result::Result<ForwardRequest, ErrorInfo> {
        let _ = stream.set_read_timeout(Some(READ_TIMEOUT));
        let line = read_line(stream).map_err(|err| match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                ErrorInfo::new("read_timeout", "request timed out")
            }
            std::io::ErrorKind::InvalidData => {
                ErrorInfo::new("request_too_large", "request exceeded maximum size")
            }
            _ => ErrorInfo::new("read_error", format!("failed to read request: {}", err)),
        })?;
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(ErrorInfo::new("empty_request", "request body was empty"));
        }
        let request = parse_forward_request(&line)?;
        request.validate()?;
        Ok(request)
    }

    /// Reads up to the first newline (exclusive), bounded by the request limit.
    fn read_line(stream: &mut UnixStream) -> std::io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
            if buffer.len() > MAX_REQUEST_BYTES {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "message exceeded maximum size",
                ));
            }
            if chunk[..n].contains(&b'\n') {
                break;
            }
        }
        if let Some(index) = buffer.iter().position(|b| *b == b'\n') {
            buffer.truncate(index);
        }
        Ok(buffer)
    }

    fn write_line<T: serde::Serialize>(stream: &mut UnixStream, value: &T) -> std::io::Result<()> {
        serde_json::to_writer(&mut *stream, value)?;
        stream.write_all(b"\n")?;
        stream.flush()
    }

    /// Sends this process's argv to the running instance.
    pub fn forward_args(socket_path: &Path, args: Vec<String>) -> Result<ForwardResponse> {
        let mut stream = UnixStream::connect(socket_path)
            .map_err(|err| OverlayError::io("connecting to running instance", err))?;
        let _ = stream.set_read_timeout(Some(READ_TIMEOUT));
        let _ = stream.set_write_timeout(Some(WRITE_TIMEOUT));

        write_line(&mut stream, &ForwardRequest::new(args))
            .map_err(|err| OverlayError::io("forwarding activation", err))?;
        let line = read_line(&mut stream)
            .map_err(|err| OverlayError::io("reading instance reply", err))?;
        if line.is_empty() {
            return Err(OverlayError::InstanceLock(
                "running instance closed the connection without replying".to_string(),
            ));
        }
        serde_json::from_slice(&line).map_err(|source| OverlayError::Json {
            context: "parsing instance reply".to_string(),
            source,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Other platforms
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(not(unix))]
mod imp {
    use super::*;

    /// Without Unix sockets every process runs as its own primary.
    pub struct PrimaryInstance {
        socket_path: PathBuf,
    }

    pub fn acquire(_lock_path: &Path, socket_path: &Path) -> Result<InstanceRole> {
        tracing::warn!("Single-instance routing unavailable on this platform");
        Ok(InstanceRole::Primary(PrimaryInstance {
            socket_path: socket_path.to_path_buf(),
        }))
    }

    impl PrimaryInstance {
        pub fn socket_path(&self) -> &Path {
            &self.socket_path
        }

        pub fn serve<H: ForwardHandler>(&mut self, _handler: H) {}
    }

    pub fn forward_args(_socket_path: &Path, _args: Vec<String>) -> Result<ForwardResponse> {
        Err(OverlayError::InstanceLock(
            "single-instance routing unavailable on this platform".to_string(),
        ))
    }
}

pub use imp::{acquire, forward_args, PrimaryInstance};

/// Handler body shared by the app: picks the activation URL out of the
/// forwarded argv and hands it to `activate`.
pub fn route_forwarded<F>(request: &ForwardRequest, scheme: &str, activate: F) -> ForwardResponse
where
    F: FnOnce(String),
{
    match find_activation_arg(&request.args, scheme) {
        Some(url) => activate(url.to_string()),
        None => tracing::debug!("Forwarded launch carried no activation URL"),
    }
    ForwardResponse::ok()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn paths(dir: &TempDir) -> (PathBuf, PathBuf) {
        (dir.path().join("instance.lock"), dir.path().join("instance.sock"))
    }

    #[test]
    fn first_acquire_is_primary_second_is_secondary() {
        let dir = TempDir::new().unwrap();
        let (lock, socket) = paths(&dir);

        let first = acquire(&lock, &socket).unwrap();
        assert!(matches!(first, InstanceRole::Primary(_)));
        assert!(socket.exists());

        let second = acquire(&lock, &socket).unwrap();
        assert!(matches!(second, InstanceRole::Secondary { .. }));
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let (lock, socket) = paths(&dir);

        let first = acquire(&lock, &socket).unwrap();
        drop(first);
        assert!(!socket.exists());
        assert!(matches!(
            acquire(&lock, &socket).unwrap(),
            InstanceRole::Primary(_)
        ));
    }

    #[test]
    fn stale_socket_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let (lock, socket) = paths(&dir);
        std::fs::write(&socket, b"stale").unwrap();

        assert!(matches!(
            acquire(&lock, &socket).unwrap(),
            InstanceRole::Primary(_)
        ));
    }

    #[test]
    fn forwarded_args_reach_handler() {
        let dir = TempDir::new().unwrap();
        let (lock, socket) = paths(&dir);
        let InstanceRole::Primary(mut primary) = acquire(&lock, &socket).unwrap() else {
            panic!("expected primary");
        };

        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        primary.serve(move |request: ForwardRequest| {
            route_forwarded(&request, "interviewsai", |url| {
                tx.lock().unwrap().send(url).unwrap();
            })
        });

        let response = forward_args(
            &socket,
            vec![
                "/usr/bin/interview-overlay".to_string(),
                "interviewsai://session/temp-1".to_string(),
            ],
        )
        .unwrap();
        assert!(response.ok);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            "interviewsai://session/temp-1"
        );
    }

    #[test]
    fn forward_without_primary_fails() {
        let dir = TempDir::new().unwrap();
        let (_, socket) = paths(&dir);
        assert!(forward_args(&socket, vec![]).is_err());
    }

    #[test]
    fn route_forwarded_without_url_is_ok() {
        let request = ForwardRequest::new(vec!["--minimized".to_string()]);
        let mut called = false;
        let response = route_forwarded(&request, "interviewsai", |_| called = true);
        assert!(response.ok);
        assert!(!called);
    }

    #[test]
    fn route_forwarded_matches_scheme_case_insensitively() {
        let request = ForwardRequest::new(vec![
            "/Applications/Overlay.app".to_string(),
            "InterviewsAI://session/temp-1".to_string(),
            "interviewsai://session/temp-2".to_string(),
        ]);
        let mut routed = None;
        let response = route_forwarded(&request, "interviewsai", |url| routed = Some(url));
        assert!(response.ok);
        assert_eq!(routed.as_deref(), Some("InterviewsAI://session/temp-1"));
    }
}
