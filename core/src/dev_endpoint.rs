//! Per-identity endpoint segments for development deployments.
//!
//! A subject is sealed with AES-256-GCM under a fresh random nonce; the
//! nonce is prepended to the ciphertext and the whole thing is base64url
//! encoded so it can sit in a URL path.

use aws_lc_rs::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::RngCore;

use crate::error::BridgeError;

pub const DEV_KEY_LEN: usize = 32;

pub struct DevEndpointCipher {
    key: LessSafeKey,
}

impl std::fmt::Debug for DevEndpointCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevEndpointCipher").finish_non_exhaustive()
    }
}

impl DevEndpointCipher {
    pub fn new(key: &[u8]) -> Result<Self, BridgeError> {
        if key.len() != DEV_KEY_LEN {
            return Err(BridgeError::Configuration(format!(
                "dev endpoint key must be {DEV_KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| BridgeError::Configuration("dev endpoint key rejected".to_string()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
        })
    }

    /// Build from standard base64 key material (as stored in env/config).
    pub fn from_base64(encoded: &str) -> Result<Self, BridgeError> {
        let key = STANDARD.decode(encoded.trim()).map_err(|_| {
            BridgeError::Configuration("dev endpoint key is not valid base64".to_string())
        })?;
        Self::new(&key)
    }

    pub fn encrypt_subject(&self, subject: &str) -> Result<String, BridgeError> {
        let mut nonce_bytes = [0_u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let mut sealed = subject.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut sealed,
            )
            .map_err(|_| BridgeError::Configuration("failed to seal subject".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Any failure collapses to `None`; callers answer 404 either way.
    pub fn decrypt_segment(&self, segment: &str) -> Option<String> {
        let bytes = URL_SAFE_NO_PAD.decode(segment.trim()).ok()?;
        if bytes.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return None;
        }
        let (nonce_bytes, sealed) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).ok()?;
        let mut buffer = sealed.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut buffer)
            .ok()?;
        String::from_utf8(plaintext.to_vec()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> DevEndpointCipher {
        DevEndpointCipher::new(&[7_u8; DEV_KEY_LEN]).unwrap()
    }

    #[test]
    fn subjects_roundtrip_through_path_segments() {
        let cipher = cipher();
        for subject in ["alice", "", "ünïcödé 名前", "a/b?c=d&e#f", "user@example.com"] {
            let segment = cipher.encrypt_subject(subject).unwrap();
            assert!(!segment.contains('/') && !segment.contains('+') && !segment.contains('='));
            assert_eq!(cipher.decrypt_segment(&segment).as_deref(), Some(subject));
        }
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let cipher = cipher();
        assert_ne!(
            cipher.encrypt_subject("alice").unwrap(),
            cipher.encrypt_subject("alice").unwrap()
        );
    }

    #[test]
    fn tampered_or_foreign_segments_fail_closed() {
        let cipher = cipher();
        let segment = cipher.encrypt_subject("alice").unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(&segment).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert_eq!(cipher.decrypt_segment(&URL_SAFE_NO_PAD.encode(bytes)), None);

        let other = DevEndpointCipher::new(&[9_u8; DEV_KEY_LEN]).unwrap();
        assert_eq!(other.decrypt_segment(&segment), None);
        assert_eq!(cipher.decrypt_segment("not base64 !!"), None);
        assert_eq!(cipher.decrypt_segment("c2hvcnQ"), None);
    }

    #[test]
    fn wrong_key_length_is_a_configuration_error() {
        let err = DevEndpointCipher::new(&[1_u8; 16]).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
        assert!(DevEndpointCipher::from_base64("***").is_err());
    }
}
