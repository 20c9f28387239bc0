//! Emergency kill-switch implementations.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::traits::KillSwitch;

/// An in-process flag flipped by an operational control surface.
#[derive(Debug, Default)]
pub struct AtomicKillSwitch {
    engaged: AtomicBool,
}

impl AtomicKillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engage(&self) {
        warn!("emergency kill switch engaged");
        self.engaged.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        warn!("emergency kill switch released");
        self.engaged.store(false, Ordering::SeqCst);
    }
}

impl KillSwitch for AtomicKillSwitch {
    fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }
}

/// Engaged while a well-known marker file exists.
///
/// Operators create or remove the marker; the gateway only checks presence.
#[derive(Debug, Clone)]
pub struct SentinelFileKillSwitch {
    marker: PathBuf,
}

impl SentinelFileKillSwitch {
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        Self { marker: marker.into() }
    }
}

impl KillSwitch for SentinelFileKillSwitch {
    fn is_engaged(&self) -> bool {
        self.marker.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_switch_toggles() {
        let switch = AtomicKillSwitch::new();
        assert!(!switch.is_engaged());
        switch.engage();
        assert!(switch.is_engaged());
        switch.release();
        assert!(!switch.is_engaged());
    }

    #[test]
    fn sentinel_switch_follows_marker_presence() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("GUARDIAN_EMERGENCY_STOP");
        let switch = SentinelFileKillSwitch::new(&marker);

        assert!(!switch.is_engaged());
        std::fs::write(&marker, b"").unwrap();
        assert!(switch.is_engaged());
        std::fs::remove_file(&marker).unwrap();
        assert!(!switch.is_engaged());
    }
}
