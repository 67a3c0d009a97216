//! File identity extraction
//!
//! A file is identified by the device it lives on and its inode number, so
//! two paths to the same file (hard links, bind mounts, `..` games) produce
//! the same identity.
//!
//! # Device packing
//!
//! The device is packed into 32 bits the way the kernel encodes `dev_t`
//! internally: 12 bits of major above 20 bits of minor.
//!
//! ```text
//!  31          20 19                    0
//! ┌──────────────┬───────────────────────┐
//! │ major (12b)  │     minor (20b)       │
//! └──────────────┴───────────────────────┘
//! ```
//!
//! Majors ≥ 4096 or minors ≥ 2^20 lose their high bits, so two distinct
//! devices can pack to the same value. Such a collision is treated as the
//! same device.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;

use nix::sys::stat::{major, minor};

const MINOR_BITS: u32 = 20;
const MINOR_MASK: u32 = (1 << MINOR_BITS) - 1;

/// Pack a device major/minor pair into 32 bits (lossy, see module docs)
pub fn pack_dev(major: u32, minor: u32) -> u32 {
    (major << MINOR_BITS) | (minor & MINOR_MASK)
}

/// Identity of a concrete file, independent of the path used to open it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileIdentity {
    /// Packed device id
    pub dev: u32,
    pub ino: u64,
}

impl FileIdentity {
    pub fn new(major: u32, minor: u32, ino: u64) -> Self {
        Self {
            dev: pack_dev(major, minor),
            ino,
        }
    }

    pub fn major(&self) -> u32 {
        self.dev >> MINOR_BITS
    }

    pub fn minor(&self) -> u32 {
        self.dev & MINOR_MASK
    }
}

impl std::fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.major(), self.minor(), self.ino)
    }
}

/// File metadata available at the hook call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub dev_major: u32,
    pub dev_minor: u32,
    pub ino: u64,
}

impl FileMeta {
    pub fn new(dev_major: u32, dev_minor: u32, ino: u64) -> Self {
        Self {
            dev_major,
            dev_minor,
            ino,
        }
    }

    pub fn from_metadata(meta: &Metadata) -> Self {
        let dev = meta.dev();
        Self {
            dev_major: major(dev) as u32,
            dev_minor: minor(dev) as u32,
            ino: meta.ino(),
        }
    }
}

/// Whether an open asks for read access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessIntent {
    /// `O_RDONLY` or `O_RDWR`
    RequestsRead,
    /// write-only, append-only or anything else
    Other,
}

impl AccessIntent {
    /// Classify from open flags by the access-mode bits only
    pub fn from_flags(flags: i32) -> Self {
        match flags & libc::O_ACCMODE {
            libc::O_RDONLY | libc::O_RDWR => AccessIntent::RequestsRead,
            _ => AccessIntent::Other,
        }
    }
}

/// Identity of the file for the learn/enforce policy. `None` when the open
/// does not request read access; such opens bypass the policy.
pub fn extract(meta: &FileMeta, intent: AccessIntent) -> Option<FileIdentity> {
    match intent {
        AccessIntent::RequestsRead => {
            Some(FileIdentity::new(meta.dev_major, meta.dev_minor, meta.ino))
        }
        AccessIntent::Other => None,
    }
}
