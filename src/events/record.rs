//! Audit record layouts
//!
//! `OpenEvent` is the fixed-layout record handed to audit consumers. Its wire
//! form is the packed little-endian concatenation of its fields:
//!
//! ```text
//! offset  size  field
//!      0     4  pid       u32
//!      4     4  uid       u32
//!      8    16  comm      NUL-padded
//!     24   256  filename  NUL-padded, best effort
//!    280     4  flags     i32
//! ```

use crate::engine::Decision;
use crate::policy::ProcessId;

/// Process name length, including the NUL terminator
pub const COMM_LEN: usize = 16;

/// File path length, including the NUL terminator
pub const FILENAME_LEN: usize = 256;

/// Size of the `OpenEvent` wire form
pub const OPEN_EVENT_SIZE: usize = 4 + 4 + COMM_LEN + FILENAME_LEN + 4;

/// One evaluated open attempt
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OpenEvent {
    pub pid: u32,
    pub uid: u32,
    pub comm: [u8; COMM_LEN],
    pub filename: [u8; FILENAME_LEN],
    pub flags: i32,
}

/// Minimal record for a deny-list hit
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlockedEvent {
    pub pid: u32,
    pub comm: [u8; COMM_LEN],
}

/// What the reporter queues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRecord {
    /// Evaluated by the mode policy
    Open { event: OpenEvent, decision: Decision },
    /// Denied by the deny-list before any other evaluation
    Blocked(BlockedEvent),
}

impl EventRecord {
    pub fn pid(&self) -> ProcessId {
        match self {
            EventRecord::Open { event, .. } => event.pid,
            EventRecord::Blocked(event) => event.pid,
        }
    }

    pub fn decision(&self) -> Decision {
        match self {
            EventRecord::Open { decision, .. } => *decision,
            EventRecord::Blocked(_) => Decision::Deny,
        }
    }
}

/// Error decoding a raw `OpenEvent`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDecodeError {
    /// Sample shorter than `OPEN_EVENT_SIZE`
    Truncated { len: usize },
}

impl std::fmt::Display for EventDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventDecodeError::Truncated { len } => write!(
                f,
                "event sample too short: {} bytes, need {}",
                len, OPEN_EVENT_SIZE
            ),
        }
    }
}

impl std::error::Error for EventDecodeError {}

/// Copy `src` into a NUL-padded fixed buffer, keeping room for a terminator
fn fill<const N: usize>(src: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    let len = src.len().min(N - 1);
    buf[..len].copy_from_slice(&src[..len]);
    buf
}

/// Text up to the first NUL
fn until_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_string()
}

impl OpenEvent {
    /// Build a record, truncating `comm` and `filename` to their fields
    pub fn new(pid: u32, uid: u32, comm: &[u8], filename: &[u8], flags: i32) -> Self {
        Self {
            pid,
            uid,
            comm: fill(comm),
            filename: fill(filename),
            flags,
        }
    }

    pub fn comm_str(&self) -> String {
        until_nul(&self.comm)
    }

    pub fn filename_str(&self) -> String {
        until_nul(&self.filename)
    }

    pub fn to_bytes(&self) -> [u8; OPEN_EVENT_SIZE] {
        let mut out = [0u8; OPEN_EVENT_SIZE];
        out[0..4].copy_from_slice(&self.pid.to_le_bytes());
        out[4..8].copy_from_slice(&self.uid.to_le_bytes());
        out[8..8 + COMM_LEN].copy_from_slice(&self.comm);
        let name = 8 + COMM_LEN;
        out[name..name + FILENAME_LEN].copy_from_slice(&self.filename);
        let flags = name + FILENAME_LEN;
        out[flags..flags + 4].copy_from_slice(&self.flags.to_le_bytes());
        out
    }

    /// Decode a raw sample. Trailing bytes past `OPEN_EVENT_SIZE` are ignored.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, EventDecodeError> {
        if raw.len() < OPEN_EVENT_SIZE {
            return Err(EventDecodeError::Truncated { len: raw.len() });
        }

        let u32_at =
            |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);

        let mut comm = [0u8; COMM_LEN];
        comm.copy_from_slice(&raw[8..8 + COMM_LEN]);
        let name = 8 + COMM_LEN;
        let mut filename = [0u8; FILENAME_LEN];
        filename.copy_from_slice(&raw[name..name + FILENAME_LEN]);

        Ok(Self {
            pid: u32_at(0),
            uid: u32_at(4),
            comm,
            filename,
            flags: u32_at(name + FILENAME_LEN) as i32,
        })
    }
}

impl std::fmt::Debug for OpenEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenEvent")
            .field("pid", &self.pid)
            .field("uid", &self.uid)
            .field("comm", &self.comm_str())
            .field("filename", &self.filename_str())
            .field("flags", &self.flags)
            .finish()
    }
}

impl BlockedEvent {
    pub fn new(pid: u32, comm: &[u8]) -> Self {
        Self {
            pid,
            comm: fill(comm),
        }
    }

    pub fn comm_str(&self) -> String {
        until_nul(&self.comm)
    }
}

impl std::fmt::Debug for BlockedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockedEvent")
            .field("pid", &self.pid)
            .field("comm", &self.comm_str())
            .finish()
    }
}
