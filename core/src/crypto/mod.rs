//! Key Provider / E2EE control (§4.7).
//!
//! Per-session store of AES-GCM key material for end-to-end media frame
//! encryption. This module owns key rings and ratcheting; it does not
//! perform the actual frame encryption/decryption, which is the external
//! frame cryptor's job (out of scope, §1) — the cryptor consumes this
//! provider through `KeyProvider::export_*`/`KeyProvider::ratchet_*`.

pub mod key_ring;
pub mod ratchet;

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::warn;

use crate::config::KeyProviderOptions;
use crate::error::CryptoError;
use crate::ids::ParticipantIdentity;

pub use key_ring::KeyRing;

/// Per-participant and shared AES-GCM key material, plus the SIF trailer
/// magic bytes used to recognize unencrypted server-injected frames on an
/// otherwise-encrypted track.
pub struct KeyProvider {
    options: KeyProviderOptions,
    shared_ring: RwLock<KeyRing>,
    participant_rings: RwLock<HashMap<ParticipantIdentity, KeyRing>>,
    sif_trailer: RwLock<Vec<u8>>,
    failures: RwLock<HashMap<ParticipantIdentity, u32>>,
}

impl KeyProvider {
    pub fn new(options: KeyProviderOptions) -> Self {
        let sif_trailer = options.uncrypted_magic_bytes.clone().unwrap_or_default();
        let ring_size = options.key_ring_size;
        Self {
            options,
            shared_ring: RwLock::new(KeyRing::new(ring_size)),
            participant_rings: RwLock::new(HashMap::new()),
            sif_trailer: RwLock::new(sif_trailer),
            failures: RwLock::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &KeyProviderOptions {
        &self.options
    }

    /// Sets the key at `key_index` (default 0) of the shared key ring.
    /// A no-op (logged) when `sharedKey` is not enabled, since the shared
    /// ring is only meaningful in that mode.
    pub fn set_shared_key(&self, key: Vec<u8>, key_index: Option<usize>) {
        if !self.options.shared_key {
            warn!("set_shared_key called but KeyProviderOptions.shared_key is false");
        }
        self.shared_ring.write().set(key_index.unwrap_or(0), key);
    }

    pub fn set_key(&self, identity: ParticipantIdentity, key: Vec<u8>, key_index: Option<usize>) {
        let mut rings = self.participant_rings.write();
        let ring = rings
            .entry(identity)
            .or_insert_with(|| KeyRing::new(self.options.key_ring_size));
        ring.set(key_index.unwrap_or(0), key);
    }

    /// Derives the next shared key via HKDF(previous, salt=ratchetSalt)
    /// and stores it at the next slot modulo `keyRingSize`, per the
    /// ratchet policy in §4.7.
    pub fn ratchet_shared_key(&self, key_index: Option<usize>) -> Result<Vec<u8>, CryptoError> {
        let mut ring = self.shared_ring.write();
        ratchet_ring(&mut ring, &self.options.ratchet_salt, key_index)
    }

    pub fn ratchet_key(
        &self,
        identity: &ParticipantIdentity,
        key_index: Option<usize>,
    ) -> Result<Vec<u8>, CryptoError> {
        let mut rings = self.participant_rings.write();
        let ring = rings
            .get_mut(identity)
            .ok_or_else(|| CryptoError::UnknownParticipant(identity.clone()))?;
        ratchet_ring(ring, &self.options.ratchet_salt, key_index)
    }

    pub fn export_shared_key(&self, key_index: Option<usize>) -> Option<Vec<u8>> {
        self.shared_ring.read().get(key_index.unwrap_or(0))
    }

    pub fn export_key(&self, identity: &ParticipantIdentity, key_index: Option<usize>) -> Option<Vec<u8>> {
        self.participant_rings
            .read()
            .get(identity)
            .and_then(|ring| ring.get(key_index.unwrap_or(0)))
    }

    pub fn set_sif_trailer(&self, trailer: Vec<u8>) {
        *self.sif_trailer.write() = trailer;
    }

    pub fn sif_trailer(&self) -> Vec<u8> {
        self.sif_trailer.read().clone()
    }

    /// Records a decryption failure for `identity`. Returns `true` once
    /// `failureTolerance` consecutive failures have accumulated, at which
    /// point the caller should surface the track as cryptographically
    /// broken (§4.7 ratchet policy) rather than keep ratcheting forever.
    pub fn record_failure(&self, identity: &ParticipantIdentity) -> bool {
        let mut failures = self.failures.write();
        let count = failures.entry(identity.clone()).or_insert(0);
        *count += 1;
        *count >= self.options.failure_tolerance
    }

    pub fn reset_failures(&self, identity: &ParticipantIdentity) {
        self.failures.write().remove(identity);
    }

    pub fn ratchet_window_size(&self) -> u32 {
        self.options.ratchet_window_size
    }
}

fn ratchet_ring(ring: &mut KeyRing, salt: &[u8], key_index: Option<usize>) -> Result<Vec<u8>, CryptoError> {
    let index = key_index.unwrap_or_else(|| ring.current_index());
    let previous = ring.get(index).ok_or(CryptoError::NoKeyAtIndex(index))?;
    let next = ratchet::derive_next_key(&previous, salt)?;
    ring.set(ring.next_index(index), next.clone());
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> KeyProviderOptions {
        KeyProviderOptions {
            shared_key: true,
            ratchet_salt: b"test-salt".to_vec(),
            ratchet_window_size: 8,
            key_ring_size: 4,
            failure_tolerance: 3,
            uncrypted_magic_bytes: None,
        }
    }

    #[test]
    fn ratchet_shared_key_advances_the_ring_and_is_reproducible_via_hkdf() {
        let provider = KeyProvider::new(opts());
        provider.set_shared_key(b"original-key-material-32-bytes!".to_vec(), Some(0));

        let first = provider.ratchet_shared_key(Some(0)).unwrap();
        let expected = ratchet::derive_next_key(b"original-key-material-32-bytes!", b"test-salt").unwrap();
        assert_eq!(first, expected);

        // the ratcheted key landed at the next ring slot, not overwriting slot 0
        assert_eq!(provider.export_shared_key(Some(0)).unwrap(), b"original-key-material-32-bytes!");
        assert_eq!(provider.export_shared_key(Some(1)).unwrap(), first);
    }

    #[test]
    fn ratchet_monotonicity_matches_repeated_hkdf_iteration() {
        let provider = KeyProvider::new(opts());
        let original = b"original-key-material-32-bytes!".to_vec();
        provider.set_shared_key(original.clone(), Some(0));

        let mut expected = original;
        let mut index = 0;
        for _ in 0..3 {
            expected = ratchet::derive_next_key(&expected, b"test-salt").unwrap();
            let got = provider.ratchet_shared_key(Some(index)).unwrap();
            assert_eq!(got, expected);
            index = (index + 1) % 4;
        }
    }

    #[test]
    fn ratcheting_an_empty_slot_fails() {
        let provider = KeyProvider::new(opts());
        let err = provider.ratchet_shared_key(Some(2)).unwrap_err();
        assert!(matches!(err, CryptoError::NoKeyAtIndex(2)));
    }

    #[test]
    fn failure_tolerance_trips_after_configured_consecutive_failures() {
        let provider = KeyProvider::new(opts());
        let identity = ParticipantIdentity::from("alice");

        assert!(!provider.record_failure(&identity));
        assert!(!provider.record_failure(&identity));
        assert!(provider.record_failure(&identity));

        provider.reset_failures(&identity);
        assert!(!provider.record_failure(&identity));
    }

    #[test]
    fn per_participant_key_rings_are_independent() {
        let provider = KeyProvider::new(opts());
        let alice = ParticipantIdentity::from("alice");
        let bob = ParticipantIdentity::from("bob");

        provider.set_key(alice.clone(), b"alice-key-material-32-bytes!!!!".to_vec(), Some(0));
        assert!(provider.export_key(&bob, Some(0)).is_none());
        assert_eq!(
            provider.export_key(&alice, Some(0)).unwrap(),
            b"alice-key-material-32-bytes!!!!"
        );
    }
}
