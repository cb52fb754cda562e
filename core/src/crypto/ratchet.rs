//! Forward-secure key update via HKDF with a fixed salt (§4.7, GLOSSARY
//! "Ratchet").

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;

const RATCHET_INFO: &[u8] = b"LKFrameEncryptionKey";
/// AES-GCM-256 key length; the key ring stores raw bytes regardless of
/// cipher, but the ratchet always derives a fixed-length output.
const DERIVED_KEY_LEN: usize = 32;

/// Derives the next key in the ratchet chain: `HKDF-Expand(HKDF-Extract(
/// salt, previous_key), info) -> 32 bytes`.
pub fn derive_next_key(previous_key: &[u8], salt: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if previous_key.is_empty() {
        return Err(CryptoError::EmptyKeyMaterial);
    }

    let hk = Hkdf::<Sha256>::new(Some(salt), previous_key);
    let mut output = vec![0u8; DERIVED_KEY_LEN];
    hk.expand(RATCHET_INFO, &mut output)
        .map_err(|_| CryptoError::RatchetDerivation)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic_for_the_same_inputs() {
        let a = derive_next_key(b"some-key-material", b"salt").unwrap();
        let b = derive_next_key(b"some-key-material", b"salt").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), DERIVED_KEY_LEN);
    }

    #[test]
    fn different_salts_produce_different_keys() {
        let a = derive_next_key(b"some-key-material", b"salt-a").unwrap();
        let b = derive_next_key(b"some-key-material", b"salt-b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_key_material_is_rejected() {
        assert!(matches!(
            derive_next_key(b"", b"salt"),
            Err(CryptoError::EmptyKeyMaterial)
        ));
    }
}
