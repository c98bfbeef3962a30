//! Client preference storage seam.
//!
//! Durable storage belongs to the embedding application; the channel only needs
//! the idle timeout it should negotiate on open.

use parking_lot::Mutex;

pub trait PreferenceStore: Send + Sync {
    /// Stored idle timeout in seconds, if the user picked one.
    fn idle_timeout_secs(&self) -> Option<u64>;

    fn set_idle_timeout_secs(&self, secs: u64);
}

/// Process-local preference store.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    idle_timeout_secs: Mutex<Option<u64>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(secs: u64) -> Self {
        Self {
            idle_timeout_secs: Mutex::new(Some(secs)),
        }
    }
}

impl PreferenceStore for MemoryPreferences {
    fn idle_timeout_secs(&self) -> Option<u64> {
        *self.idle_timeout_secs.lock()
    }

    fn set_idle_timeout_secs(&self, secs: u64) {
        *self.idle_timeout_secs.lock() = Some(secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_preferences_round_trip() {
        let prefs = MemoryPreferences::new();
        assert_eq!(prefs.idle_timeout_secs(), None);
        prefs.set_idle_timeout_secs(900);
        assert_eq!(prefs.idle_timeout_secs(), Some(900));
    }
}
