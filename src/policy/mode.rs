//! Per-process policy mode

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::bounded::{Access, BoundedMap};
use super::{ProcessId, StoreError};

/// Default number of processes with a non-Off mode
pub const DEFAULT_MODE_CAPACITY: usize = 10_240;

/// Policy state of one process.
///
/// The discriminants are the raw values used by control-plane inputs.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// No policy; every open is allowed and nothing is learned
    #[default]
    Off = 0,
    /// Record the identity of every read-open, never deny
    Learn = 1,
    /// Allow only read-opens of identities learned earlier
    Enforce = 2,
}

impl Mode {
    /// Decode a raw mode value. Anything outside the enum reads as `Off`,
    /// the same as "no policy configured".
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Mode::Learn,
            2 => Mode::Enforce,
            _ => Mode::Off,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Off => "off",
            Mode::Learn => "learn",
            Mode::Enforce => "enforce",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Mode::Off),
            "learn" => Ok(Mode::Learn),
            "enforce" => Ok(Mode::Enforce),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

/// Maps a process to its `Mode`. Off is stored as absence.
pub struct ModeStore {
    modes: BoundedMap<ProcessId, Mode>,
}

impl ModeStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            modes: BoundedMap::with_capacity(capacity),
        }
    }

    /// Mode of `pid`, `Off` if none is set
    pub fn get_mode(&self, pid: ProcessId) -> Mode {
        self.mode_with(pid, Access::Blocking)
    }

    /// Mode lookup for the decision path
    pub fn mode_with(&self, pid: ProcessId, access: Access) -> Mode {
        self.modes.get(&pid, access).unwrap_or_default()
    }

    pub fn set_mode(&self, pid: ProcessId, mode: Mode) -> Result<(), StoreError> {
        if mode == Mode::Off {
            self.modes.remove(&pid);
            return Ok(());
        }
        self.modes.insert(pid, mode, Access::Blocking).map(|_| ())
    }

    /// Drop the entry for `pid`. Returns the mode it had.
    pub fn clear_mode(&self, pid: ProcessId) -> Mode {
        self.modes.remove(&pid).unwrap_or_default()
    }

    /// Processes with a non-Off mode
    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.modes.capacity()
    }

    pub fn entries(&self) -> Vec<(ProcessId, Mode)> {
        self.modes.entries()
    }
}

impl Default for ModeStore {
    fn default() -> Self {
        Self::new(DEFAULT_MODE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_is_off() {
        let store = ModeStore::default();
        assert_eq!(store.get_mode(42), Mode::Off);
    }

    #[test]
    fn test_set_and_clear() {
        let store = ModeStore::default();
        store.set_mode(100, Mode::Learn).unwrap();
        assert_eq!(store.get_mode(100), Mode::Learn);

        store.set_mode(100, Mode::Enforce).unwrap();
        assert_eq!(store.get_mode(100), Mode::Enforce);
        assert_eq!(store.len(), 1);

        assert_eq!(store.clear_mode(100), Mode::Enforce);
        assert_eq!(store.get_mode(100), Mode::Off);
        assert!(store.is_empty());
    }

    #[test]
    fn test_off_frees_the_slot() {
        let store = ModeStore::new(1);
        store.set_mode(1, Mode::Learn).unwrap();
        assert!(store.set_mode(2, Mode::Learn).is_err());

        store.set_mode(1, Mode::Off).unwrap();
        store.set_mode(2, Mode::Learn).unwrap();
        assert_eq!(store.get_mode(2), Mode::Learn);
    }

    #[test]
    fn test_full_store_keeps_existing() {
        let store = ModeStore::new(1);
        store.set_mode(1, Mode::Enforce).unwrap();
        assert_eq!(
            store.set_mode(2, Mode::Learn),
            Err(StoreError::Full { capacity: 1 })
        );
        assert_eq!(store.get_mode(1), Mode::Enforce);
        assert_eq!(store.get_mode(2), Mode::Off);
    }

    #[test]
    fn test_from_raw_unknown_is_off() {
        assert_eq!(Mode::from_raw(0), Mode::Off);
        assert_eq!(Mode::from_raw(1), Mode::Learn);
        assert_eq!(Mode::from_raw(2), Mode::Enforce);
        assert_eq!(Mode::from_raw(3), Mode::Off);
        assert_eq!(Mode::from_raw(255), Mode::Off);
    }

    #[test]
    fn test_parse() {
        assert_eq!("Enforce".parse::<Mode>(), Ok(Mode::Enforce));
        assert!("strict".parse::<Mode>().is_err());
    }
}
