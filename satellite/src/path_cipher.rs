use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use crate::{
    access::AccessGrant,
    error::{SatelliteError, SatelliteResult},
};

const NONCE_SIZE: usize = 12;

/// Per-path encryption keyed from an access grant's root secret.
///
/// Each `/`-separated segment is sealed independently with AES-256-GCM
/// under a key derived per bucket, so listing a prefix still works on the
/// encrypted form. Nonces are derived from the segment content, making the
/// scheme deterministic: the same path always encrypts to the same key,
/// which is what a content-addressed store requires.
pub struct PathCipher {
    cipher: Aes256Gcm,
    key: [u8; 32],
}

impl PathCipher {
    pub fn new(grant: &AccessGrant, bucket: &str) -> SatelliteResult<Self> {
        let hk = Hkdf::<Sha256>::new(Some(bucket.as_bytes()), grant.root_secret.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(b"storx-path-cipher", &mut key)
            .map_err(|e| SatelliteError::Crypto(format!("key derivation: {e}")))?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| SatelliteError::Crypto(e.to_string()))?;
        Ok(Self { cipher, key })
    }

    fn segment_nonce(&self, segment: &str) -> [u8; NONCE_SIZE] {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(segment.as_bytes());
        let digest = hasher.finalize();
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&digest[..NONCE_SIZE]);
        nonce
    }

    pub fn encrypt_segment(&self, segment: &str) -> SatelliteResult<String> {
        let nonce_bytes = self.segment_nonce(segment);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let sealed = self
            .cipher
            .encrypt(nonce, segment.as_bytes())
            .map_err(|e| SatelliteError::Crypto(e.to_string()))?;
        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(combined))
    }

    pub fn decrypt_segment(&self, segment: &str) -> SatelliteResult<String> {
        let combined = URL_SAFE_NO_PAD
            .decode(segment.trim_end_matches('='))
            .map_err(|e| SatelliteError::Crypto(e.to_string()))?;
        if combined.len() < NONCE_SIZE + 16 {
            return Err(SatelliteError::Crypto("ciphertext too short".into()));
        }
        let (nonce_bytes, sealed) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plain = self
            .cipher
            .decrypt(nonce, sealed)
            .map_err(|e| SatelliteError::Crypto(e.to_string()))?;
        String::from_utf8(plain).map_err(|e| SatelliteError::Crypto(e.to_string()))
    }

    pub fn encrypt_path(&self, path: &str) -> SatelliteResult<String> {
        let segments: Result<Vec<_>, _> = path
            .split('/')
            .map(|segment| self.encrypt_segment(segment))
            .collect();
        Ok(segments?.join("/"))
    }

    pub fn decrypt_path(&self, path: &str) -> SatelliteResult<String> {
        let segments: Result<Vec<_>, _> = path
            .split('/')
            .map(|segment| self.decrypt_segment(segment))
            .collect();
        Ok(segments?.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant() -> AccessGrant {
        AccessGrant {
            satellite: "https://gateway.storx.example".into(),
            access_key_id: "ak".into(),
            secret_access_key: "sk".into(),
            root_secret: "correct horse battery staple".into(),
            project_id: String::new(),
        }
    }

    #[test]
    fn path_roundtrips() {
        let cipher = PathCipher::new(&grant(), "gmail").unwrap();
        let path = "a@x/invoice_march_m4.json";
        let sealed = cipher.encrypt_path(path).unwrap();
        assert_ne!(sealed, path);
        assert_eq!(cipher.decrypt_path(&sealed).unwrap(), path);
    }

    #[test]
    fn encryption_is_deterministic_per_bucket() {
        let cipher = PathCipher::new(&grant(), "gmail").unwrap();
        let a = cipher.encrypt_path("a@x/mail.json").unwrap();
        let b = cipher.encrypt_path("a@x/mail.json").unwrap();
        assert_eq!(a, b);

        let other = PathCipher::new(&grant(), "outlook").unwrap();
        assert_ne!(other.encrypt_path("a@x/mail.json").unwrap(), a);
    }

    #[test]
    fn tampered_segment_fails() {
        let cipher = PathCipher::new(&grant(), "gmail").unwrap();
        let sealed = cipher.encrypt_segment("hello").unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let tampered = URL_SAFE_NO_PAD.encode(&bytes);
        assert!(cipher.decrypt_segment(&tampered).is_err());
    }

    #[test]
    fn short_ciphertext_rejected() {
        let cipher = PathCipher::new(&grant(), "gmail").unwrap();
        let short = URL_SAFE_NO_PAD.encode([0u8; 10]);
        assert!(cipher.decrypt_segment(&short).is_err());
    }

    #[test]
    fn wrong_root_secret_fails() {
        let cipher = PathCipher::new(&grant(), "gmail").unwrap();
        let sealed = cipher.encrypt_path("a@x/mail.json").unwrap();

        let mut other_grant = grant();
        other_grant.root_secret = "different".into();
        let other = PathCipher::new(&other_grant, "gmail").unwrap();
        assert!(other.decrypt_path(&sealed).is_err());
    }
}
