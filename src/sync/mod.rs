//! Settings replication between an authoritative server and its clients
//!
//! Messages are length-prefixed JSON (u32 little-endian length, then the
//! payload). On join the server sends a full snapshot of every domain; after
//! that only `SettingChanged` notifications flow. The server is authoritative:
//! a client's `SetValue` is applied, persisted and echoed to every peer.

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};
use tracing::{debug, info, warn};

mod messages;
pub use messages::{ConfigSnapshot, SettingPayload, SyncRequest, SyncResponse, ValidationPayload};

#[cfg(unix)]
mod transport;
#[cfg(unix)]
pub use transport::{Peer, SyncServer, socket_path};

use crate::config::{ConfigRegistry, SetOutcome};
use crate::constants::sync::MAX_MESSAGE_SIZE;
use crate::host::{FileStore, SessionRole};

/// Write length-prefixed message to stream
pub fn write_message<W: Write, T: Serialize>(stream: &mut W, msg: &T) -> Result<()> {
    let json = serde_json::to_vec(msg).context("Failed to serialize message to JSON")?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(anyhow!("Message too large: {} bytes (max: {})", json.len(), MAX_MESSAGE_SIZE));
    }

    let len = json.len() as u32;
    stream
        .write_all(&len.to_le_bytes())
        .context("Failed to write message length")?;
    stream.write_all(&json).context("Failed to write message payload")?;
    stream.flush().context("Failed to flush stream")?;

    Ok(())
}

/// Read length-prefixed message from stream
pub fn read_message<R: Read, T: DeserializeOwned>(stream: &mut R) -> Result<T> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .context("Failed to read message length")?;
    let len = u32::from_le_bytes(len_buf) as usize;

    // Sanity check (prevent DoS via huge allocation)
    if len > MAX_MESSAGE_SIZE {
        return Err(anyhow!("Message too large: {} bytes (max: {})", len, MAX_MESSAGE_SIZE));
    }

    let mut json_buf = vec![0u8; len];
    stream
        .read_exact(&mut json_buf)
        .context("Failed to read message payload")?;

    serde_json::from_slice(&json_buf).context("Failed to deserialize message from JSON")
}

/// What the server does with the outcome of a request
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Answer only the requesting peer
    Respond(SyncResponse),
    /// Send to every connected peer
    Broadcast(SyncResponse),
    /// Stop serving
    Shutdown,
}

/// Server-side handling of one request
pub fn handle_request(registry: &mut ConfigRegistry, files: &dyn FileStore, request: SyncRequest) -> Reply {
    match request {
        SyncRequest::Hello => Reply::Respond(SyncResponse::Snapshots(registry.snapshots())),
        SyncRequest::GetSnapshot(domain) => match registry.get(&domain) {
            Some(config) => Reply::Respond(SyncResponse::Snapshot(ConfigSnapshot::from(config))),
            None => Reply::Respond(SyncResponse::Error(format!("Unknown domain '{domain}'"))),
        },
        SyncRequest::SetValue { domain, code, value } => {
            let Some(config) = registry.get_mut(&domain) else {
                return Reply::Respond(SyncResponse::Error(format!("Unknown domain '{domain}'")));
            };

            match config.set_value(&code, value) {
                SetOutcome::Changed => {
                    config.write_to_file(files);
                    let value = config
                        .settings()
                        .get(&code)
                        .map(|s| s.value().clone())
                        .unwrap_or_default();
                    info!(domain = %domain, code = %code, value = %value, "Setting changed by peer");
                    Reply::Broadcast(SyncResponse::SettingChanged { domain, code, value })
                }
                SetOutcome::Unchanged => Reply::Respond(SyncResponse::Ready),
                SetOutcome::UnknownSetting => {
                    Reply::Respond(SyncResponse::Error(format!("Unknown setting '{code}' in '{domain}'")))
                }
                SetOutcome::ServerAuthoritative => {
                    Reply::Respond(SyncResponse::Error(format!("Setting '{code}' cannot be changed here")))
                }
            }
        }
        SyncRequest::Ping => Reply::Respond(SyncResponse::Pong),
        SyncRequest::Shutdown => Reply::Shutdown,
    }
}

/// Client-side handling of a server message. Returns whether local state changed.
pub fn apply_response(registry: &mut ConfigRegistry, response: SyncResponse) -> bool {
    match response {
        SyncResponse::Snapshots(snapshots) => {
            let changed = !snapshots.is_empty();
            for snapshot in snapshots {
                registry.replace_from_snapshot(snapshot, SessionRole::Client);
            }
            changed
        }
        SyncResponse::Snapshot(snapshot) => {
            registry.replace_from_snapshot(snapshot, SessionRole::Client);
            true
        }
        SyncResponse::SettingChanged { domain, code, value } => match registry.get_mut(&domain) {
            Some(config) => config.apply_remote(&code, value),
            None => {
                warn!(domain = %domain, "Change for unknown domain");
                false
            }
        },
        SyncResponse::Error(message) => {
            warn!(error = %message, "Server reported an error");
            false
        }
        SyncResponse::Pong | SyncResponse::Ready => {
            debug!("Server acknowledged");
            false
        }
    }
}
