use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::fd::set_cloexec;

/// Unix domain socket listener.
///
/// Binds a filesystem-path socket, hardens its permissions and removes the
/// socket file again on drop if it is still the one this listener created.
/// Every descriptor handed out is close-on-exec.
pub struct UnixDomainSocket {
    listener: UnixListener,
    guard: SocketPathGuard,
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Bind and listen on a filesystem-path Unix domain socket.
    ///
    /// If the path already exists and is a socket, it is removed first
    /// (stale socket cleanup). Any other file type is refused.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        validate_path_len(&path)?;
        remove_stale_socket(&path)?;

        let listener = UnixListener::bind(&path).map_err(|e| bind_error(&path, e))?;
        set_cloexec(listener.as_raw_fd()).map_err(|e| bind_error(&path, e))?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| bind_error(&path, e))?;
        let created = std::fs::symlink_metadata(&path).map_err(|e| bind_error(&path, e))?;

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            listener,
            guard: SocketPathGuard {
                path,
                created_inode: Some((created.dev(), created.ino())),
            },
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        set_cloexec(stream.as_raw_fd()).map_err(TransportError::Accept)?;
        debug!("accepted connection");
        Ok(stream)
    }

    /// Connect to a listening Unix domain socket (blocking, single attempt).
    pub fn connect(path: impl AsRef<Path>) -> Result<UnixStream> {
        let path = path.as_ref();
        let connect_error = |source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        };
        let stream = UnixStream::connect(path).map_err(connect_error)?;
        set_cloexec(stream.as_raw_fd()).map_err(connect_error)?;
        debug!(?path, "connected to unix domain socket");
        Ok(stream)
    }

    /// Convert into a tokio-driven listener bound to the same path.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(feature = "async")]
    pub fn into_async(self) -> Result<AsyncUnixListener> {
        self.listener.set_nonblocking(true)?;
        let listener = tokio::net::UnixListener::from_std(self.listener)?;
        Ok(AsyncUnixListener {
            listener,
            guard: self.guard,
        })
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.guard.path
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "unix-domain-socket"
    }
}

/// Tokio listener on a Unix domain socket created by [`UnixDomainSocket`].
#[cfg(feature = "async")]
pub struct AsyncUnixListener {
    listener: tokio::net::UnixListener,
    guard: SocketPathGuard,
}

#[cfg(feature = "async")]
impl AsyncUnixListener {
    /// Bind a filesystem-path socket and register it with the runtime.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        UnixDomainSocket::bind(path)?.into_async()
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Result<tokio::net::UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        set_cloexec(stream.as_raw_fd()).map_err(TransportError::Accept)?;
        debug!("accepted connection");
        Ok(stream)
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.guard.path
    }
}

/// Removes the socket file on drop if its identity is unchanged.
struct SocketPathGuard {
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl Drop for SocketPathGuard {
    fn drop(&mut self) {
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}

/// Maximum socket path length.
/// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS and the BSDs.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

fn validate_path_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: MAX_PATH_LEN,
        });
    }
    Ok(())
}

fn remove_stale_socket(path: &Path) -> Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(bind_error(path, e)),
    };
    if !metadata.file_type().is_socket() {
        return Err(bind_error(
            path,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "existing path is not a unix socket",
            ),
        ));
    }
    debug!(?path, "removing stale socket");
    std::fs::remove_file(path).map_err(|e| bind_error(path, e))
}

fn bind_error(path: &Path, source: std::io::Error) -> TransportError {
    TransportError::Bind {
        path: path.to_path_buf(),
        source,
    }
}
