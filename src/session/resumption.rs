//! Session ticket storage for 0-RTT resumption.
//!
//! A store holds at most one ticket. Applications that drive several device
//! identities use one store per identity; [`FileSessionStore::for_identity`]
//! derives a separate file for each (host, client id) pair.
//!
//! File format (big-endian):
//!
//! ```text
//! "MQTK" | version: u8 | issued_at: u64 unix secs | len: u32 | ticket bytes
//! ```

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

const TICKET_MAGIC: &[u8; 4] = b"MQTK";
const TICKET_VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 8 + 4;

/// Largest ticket a store accepts.
pub const MAX_TICKET_LEN: usize = 64 * 1024;

/// Opaque server-issued resumption credential.
///
/// The ticket bytes are zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTicket {
    bytes: Vec<u8>,
    issued_at: SystemTime,
}

impl SessionTicket {
    /// Wrap ticket bytes issued now.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self::with_issued_at(bytes, SystemTime::now())
    }

    /// Wrap ticket bytes with an explicit issue time.
    pub fn with_issued_at(bytes: Vec<u8>, issued_at: SystemTime) -> Self {
        Self { bytes, issued_at }
    }

    /// Raw ticket bytes, handed unmodified to the QUIC handshake.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// When the ticket was issued.
    pub fn issued_at(&self) -> SystemTime {
        self.issued_at
    }

    fn issued_secs(&self) -> u64 {
        self.issued_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Reject tickets no store can hand back.
    fn check_len(&self) -> Result<(), StoreError> {
        if self.bytes.len() > MAX_TICKET_LEN {
            return Err(StoreError::TooLarge(self.bytes.len()));
        }
        Ok(())
    }

    /// Serialize into the on-disk format.
    fn to_file_bytes(&self) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        self.check_len()?;
        let len = u32::try_from(self.bytes.len()).map_err(|_| StoreError::TooLarge(self.bytes.len()))?;
        let mut out = Zeroizing::new(Vec::with_capacity(HEADER_LEN + self.bytes.len()));
        out.extend_from_slice(TICKET_MAGIC);
        out.push(TICKET_VERSION);
        out.extend_from_slice(&self.issued_secs().to_be_bytes());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&self.bytes);
        Ok(out)
    }

    /// Parse the on-disk format.
    fn from_file_bytes(data: &[u8]) -> Result<Self, StoreError> {
        if data.len() < HEADER_LEN {
            return Err(StoreError::Corrupt("truncated header"));
        }
        if &data[..4] != TICKET_MAGIC {
            return Err(StoreError::Corrupt("bad magic"));
        }
        if data[4] != TICKET_VERSION {
            return Err(StoreError::Corrupt("unsupported version"));
        }

        let mut secs = [0u8; 8];
        secs.copy_from_slice(&data[5..13]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&data[13..17]);
        let len = u32::from_be_bytes(len) as usize;

        if len > MAX_TICKET_LEN {
            return Err(StoreError::Corrupt("ticket too large"));
        }
        let body = &data[HEADER_LEN..];
        if body.len() != len {
            return Err(StoreError::Corrupt("length mismatch"));
        }

        let issued_at = UNIX_EPOCH + Duration::from_secs(u64::from_be_bytes(secs));
        Ok(Self::with_issued_at(body.to_vec(), issued_at))
    }
}

impl fmt::Debug for SessionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTicket")
            .field("len", &self.bytes.len())
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// Errors that can occur when loading or saving a ticket.
#[derive(Debug, Error)]
pub enum StoreError {
    /// File system failure.
    #[error("ticket store I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stored ticket cannot be parsed.
    #[error("corrupt ticket file: {0}")]
    Corrupt(&'static str),

    /// The ticket exceeds [`MAX_TICKET_LEN`].
    #[error("session ticket of {0} bytes is too large to store")]
    TooLarge(usize),
}

/// Single-slot ticket storage.
pub trait SessionStore: Send + Sync {
    /// The stored ticket, or `None` when nothing was saved yet.
    fn load(&self) -> Result<Option<SessionTicket>, StoreError>;

    /// Replace the stored ticket.
    fn save(&self, ticket: &SessionTicket) -> Result<(), StoreError>;

    /// Remove the stored ticket.
    ///
    /// Only called when the server declares the ticket permanently invalid;
    /// a merely rejected 0-RTT attempt keeps it.
    fn invalidate(&self) -> Result<(), StoreError>;
}

/// Ticket kept in a file.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for one (host, client id) pair inside `dir`.
    ///
    /// Distinct pairs always map to distinct files.
    pub fn for_identity(dir: impl AsRef<Path>, host: &str, client_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(host.as_bytes());
        hasher.update([0u8]);
        hasher.update(client_id.as_bytes());
        let digest = hasher.finalize();
        let name = format!("{}.ticket", hex::encode(&digest[..16]));
        Self::new(dir.as_ref().join(name))
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<SessionTicket>, StoreError> {
        let data = match fs::read(&self.path) {
            Ok(data) => Zeroizing::new(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let ticket = SessionTicket::from_file_bytes(&data)?;
        tracing::debug!(path = %self.path.display(), len = ticket.bytes.len(), "loaded session ticket");
        Ok(Some(ticket))
    }

    fn save(&self, ticket: &SessionTicket) -> Result<(), StoreError> {
        let contents = ticket.to_file_bytes()?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write then rename, so a crash never leaves a half-written ticket
        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&contents)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        tracing::debug!(path = %self.path.display(), "saved session ticket");
        Ok(())
    }

    fn invalidate(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "invalidated session ticket");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Ticket kept in memory for the life of the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<SessionTicket>>,
}

impl MemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<SessionTicket>, StoreError> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, ticket: &SessionTicket) -> Result<(), StoreError> {
        ticket.check_len()?;
        *self.slot.lock() = Some(ticket.clone());
        Ok(())
    }

    fn invalidate(&self) -> Result<(), StoreError> {
        self.slot.lock().take();
        Ok(())
    }
}
