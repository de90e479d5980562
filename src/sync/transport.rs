//! Unix socket transport for settings sync
//!
//! Both ends talk through a [`Peer`]. A client sends [`SyncRequest`]s and
//! reads [`SyncResponse`]s; the server holds one `Peer` per client and uses
//! the same framing the other way round. The listener only ever polls so the
//! serve loop can notice shutdown between accepts.

use std::io::ErrorKind;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::{SyncRequest, SyncResponse, read_message, write_message};
use crate::constants::paths::SOCKET_FILE;

/// Where the session socket lives: the explicit path, else the runtime dir,
/// else the cache dir
pub fn socket_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .map(|dir| dir.join(SOCKET_FILE))
        .context("No runtime or cache directory to place the sync socket in")
}

/// One framed connection between a client and the server
pub struct Peer {
    stream: UnixStream,
}

impl Peer {
    /// Connect to a running server
    pub fn join(explicit: Option<PathBuf>) -> Result<Self> {
        let path = socket_path(explicit)?;
        let stream = UnixStream::connect(&path)
            .context(format!("No settings server listening at {}", path.display()))?;
        debug!(socket = %path.display(), "Connected to settings server");
        Ok(Self { stream })
    }

    /// Second handle on the same connection, kept by the server for broadcasts
    pub fn duplicate(&self) -> Result<Self> {
        let stream = self.stream.try_clone().context("Failed to duplicate peer connection")?;
        Ok(Self { stream })
    }

    pub fn send<T: Serialize>(&mut self, msg: &T) -> Result<()> {
        write_message(&mut self.stream, msg)
    }

    /// Next frame from the other end (blocking)
    pub fn recv<T: DeserializeOwned>(&mut self) -> Result<T> {
        read_message(&mut self.stream)
    }

    /// Client side round trip. The reply is whatever the server sends next,
    /// which may be a broadcast that raced the answer.
    pub fn request(&mut self, req: SyncRequest) -> Result<SyncResponse> {
        self.send(&req)?;
        self.recv()
    }
}

/// Listening side. Removes its socket file when dropped.
pub struct SyncServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl SyncServer {
    /// Bind the session socket. A leftover socket file is replaced, but one
    /// with a live server behind it is an error.
    pub fn bind(explicit: Option<PathBuf>) -> Result<Self> {
        let socket_path = socket_path(explicit)?;
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create socket directory: {}", parent.display()))?;
        }

        if socket_path.exists() {
            if UnixStream::connect(&socket_path).is_ok() {
                bail!("A settings server is already listening at {}", socket_path.display());
            }
            info!(socket = %socket_path.display(), "Replacing stale socket");
            std::fs::remove_file(&socket_path)
                .context(format!("Failed to remove stale socket: {}", socket_path.display()))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .context(format!("Failed to bind socket at {}", socket_path.display()))?;
        listener
            .set_nonblocking(true)
            .context("Failed to make the sync listener non-blocking")?;

        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o700))
                .context("Failed to set socket permissions")?;
        }

        Ok(Self { listener, socket_path })
    }

    /// The next client waiting to connect, if any
    pub fn poll_peer(&self) -> Result<Option<Peer>> {
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                // Peers are served from their own thread with blocking reads
                stream
                    .set_nonblocking(false)
                    .context("Failed to make peer connection blocking")?;
                Ok(Some(Peer { stream }))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e).context("Failed to accept sync connection"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for SyncServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}
