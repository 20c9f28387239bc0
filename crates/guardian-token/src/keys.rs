//! Reference signing-key providers.
//!
//! Key storage and rotation mechanics belong to the deployment; these two
//! providers cover tests, demos, and single-process services.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use tracing::info;

use guardian_core::traits::{SigningKey, SigningKeyProvider};

/// A single key that never rotates.
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    epoch: u64,
    key: SigningKey,
}

impl StaticKeyProvider {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            epoch: 1,
            key: SigningKey(key.into()),
        }
    }
}

impl SigningKeyProvider for StaticKeyProvider {
    fn current_epoch(&self) -> u64 {
        self.epoch
    }

    fn key_for(&self, epoch: u64) -> Option<SigningKey> {
        (epoch == self.epoch).then(|| self.key.clone())
    }
}

#[derive(Debug)]
struct RotationState {
    current: u64,
    keys: BTreeMap<u64, SigningKey>,
}

/// A provider whose `rotate` retires every earlier epoch.
///
/// Rotation is the revocation mechanism: tokens rooted in a retired epoch
/// fail verification on their next use, even if their expiry has not passed.
#[derive(Debug)]
pub struct RotatingKeyProvider {
    state: RwLock<RotationState>,
}

impl RotatingKeyProvider {
    /// Start at epoch 1 with `initial`.
    pub fn new(initial: impl Into<Vec<u8>>) -> Self {
        let mut keys = BTreeMap::new();
        keys.insert(1, SigningKey(initial.into()));
        Self {
            state: RwLock::new(RotationState { current: 1, keys }),
        }
    }

    /// Install `next` as a new epoch and retire all earlier ones.
    ///
    /// Returns the new epoch.
    pub fn rotate(&self, next: impl Into<Vec<u8>>) -> u64 {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let retired = state.current;
        state.current += 1;
        let current = state.current;
        state.keys.clear();
        state.keys.insert(current, SigningKey(next.into()));
        info!(retired_epoch = retired, current_epoch = current, "signing key rotated");
        current
    }
}

impl SigningKeyProvider for RotatingKeyProvider {
    fn current_epoch(&self) -> u64 {
        self.state.read().unwrap_or_else(PoisonError::into_inner).current
    }

    fn key_for(&self, epoch: u64) -> Option<SigningKey> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.keys.get(&epoch).cloned()
    }
}
