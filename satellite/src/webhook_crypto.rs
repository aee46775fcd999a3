use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rsa::{
    pkcs1::DecodeRsaPrivateKey, pkcs8::DecodePrivateKey, traits::PublicKeyParts, Oaep,
    RsaPrivateKey,
};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{SatelliteError, SatelliteResult};

const MIN_KEY_BITS: usize = 2048;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const OAEP_LABEL: &str = "storx-webhook";

/// Required value of the `X-Encryption` header on webhook ingest.
pub const ENCRYPTION_SCHEME: &str = "RSA-AES";

/// Compare the `X-Encryption` header against the expected scheme without
/// leaking a timing oracle.
pub fn scheme_matches(header: &str) -> bool {
    header.as_bytes().ct_eq(ENCRYPTION_SCHEME.as_bytes()).into()
}

/// Decrypts the satellite's hybrid envelopes:
/// `base64url(RSA_OAEP(aes_key)) : base64url(nonce || ciphertext || tag)`.
pub struct WebhookDecryptor {
    key: RsaPrivateKey,
}

impl WebhookDecryptor {
    /// Load an RSA private key from PEM, accepting both PKCS#8 and PKCS#1
    /// framing. Keys under 2048 bits are rejected.
    pub fn from_pem(pem: &str) -> SatelliteResult<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| SatelliteError::Crypto(format!("unreadable RSA key: {e}")))?;
        if key.size() * 8 < MIN_KEY_BITS {
            return Err(SatelliteError::Crypto(format!(
                "RSA key too small: {} bits",
                key.size() * 8
            )));
        }
        Ok(Self { key })
    }

    pub fn from_pem_file(path: &std::path::Path) -> SatelliteResult<Self> {
        let pem = std::fs::read_to_string(path)
            .map_err(|e| SatelliteError::Crypto(format!("read {}: {e}", path.display())))?;
        Self::from_pem(&pem)
    }

    /// Unwrap the envelope and return the plaintext event JSON. The AES key
    /// buffer is wiped before returning on every path.
    pub fn decrypt(&self, body: &[u8]) -> SatelliteResult<Vec<u8>> {
        let text = std::str::from_utf8(body)
            .map_err(|_| SatelliteError::Crypto("body is not UTF-8".into()))?;
        let (key_part, payload_part) = text
            .split_once(':')
            .ok_or_else(|| SatelliteError::Crypto("missing ':' separator".into()))?;

        let wrapped_key = decode_b64url(key_part.trim())?;
        let payload = decode_b64url(payload_part.trim())?;
        if payload.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SatelliteError::Crypto("payload too short".into()));
        }

        // OAEP label first, then the unlabeled form older satellites send.
        let labeled = Oaep::new_with_label::<Sha256, _>(OAEP_LABEL);
        let mut aes_key = self
            .key
            .decrypt(labeled, &wrapped_key)
            .or_else(|_| self.key.decrypt(Oaep::new::<Sha256>(), &wrapped_key))
            .map_err(|e| SatelliteError::Crypto(format!("RSA unwrap: {e}")))?;

        let result = (|| {
            if aes_key.len() != 32 {
                return Err(SatelliteError::Crypto(format!(
                    "unexpected AES key length {}",
                    aes_key.len()
                )));
            }
            let cipher = Aes256Gcm::new_from_slice(&aes_key)
                .map_err(|e| SatelliteError::Crypto(e.to_string()))?;
            let (nonce_bytes, sealed) = payload.split_at(NONCE_SIZE);
            cipher
                .decrypt(Nonce::from_slice(nonce_bytes), sealed)
                .map_err(|e| SatelliteError::Crypto(format!("AES open: {e}")))
        })();
        aes_key.zeroize();
        result
    }
}

/// base64url decode tolerating both padded and unpadded input.
fn decode_b64url(s: &str) -> SatelliteResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(s.trim_end_matches('='))
        .map_err(|e| SatelliteError::Crypto(format!("base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use rand::RngCore;
    use rsa::pkcs8::EncodePrivateKey;
    use rsa::RsaPublicKey;

    fn keypair() -> (WebhookDecryptor, RsaPublicKey, String) {
        let key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public = RsaPublicKey::from(&key);
        let pem = key.to_pkcs8_pem(rsa::pkcs8::LineEnding::LF).unwrap().to_string();
        (WebhookDecryptor { key }, public, pem)
    }

    fn seal(public: &RsaPublicKey, plaintext: &[u8], with_label: bool) -> Vec<u8> {
        let mut aes_key = [0u8; 32];
        OsRng.fill_bytes(&mut aes_key);
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new_from_slice(&aes_key).unwrap();
        let sealed = cipher.encrypt(Nonce::from_slice(&nonce), plaintext).unwrap();

        let padding = if with_label {
            Oaep::new_with_label::<Sha256, _>(OAEP_LABEL)
        } else {
            Oaep::new::<Sha256>()
        };
        let wrapped = public.encrypt(&mut OsRng, padding, &aes_key).unwrap();

        let mut payload = nonce.to_vec();
        payload.extend_from_slice(&sealed);
        format!(
            "{}:{}",
            URL_SAFE_NO_PAD.encode(wrapped),
            URL_SAFE_NO_PAD.encode(payload)
        )
        .into_bytes()
    }

    #[test]
    fn decrypts_labeled_envelope() {
        let (decryptor, public, _) = keypair();
        let body = seal(&public, b"{\"operation\":\"DELETE\"}", true);
        assert_eq!(decryptor.decrypt(&body).unwrap(), b"{\"operation\":\"DELETE\"}");
    }

    #[test]
    fn decrypts_unlabeled_envelope() {
        let (decryptor, public, _) = keypair();
        let body = seal(&public, b"legacy", false);
        assert_eq!(decryptor.decrypt(&body).unwrap(), b"legacy");
    }

    #[test]
    fn pem_parses_pkcs8() {
        let (_, _, pem) = keypair();
        assert!(WebhookDecryptor::from_pem(&pem).is_ok());
    }

    #[test]
    fn small_key_rejected() {
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let pem = key.to_pkcs8_pem(rsa::pkcs8::LineEnding::LF).unwrap().to_string();
        assert!(WebhookDecryptor::from_pem(&pem).is_err());
    }

    #[test]
    fn missing_separator_rejected() {
        let (decryptor, _, _) = keypair();
        assert!(decryptor.decrypt(b"deadbeef").is_err());
    }

    #[test]
    fn short_payload_rejected() {
        let (decryptor, public, _) = keypair();
        let wrapped = public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &[0u8; 32])
            .unwrap();
        let body = format!(
            "{}:{}",
            URL_SAFE_NO_PAD.encode(wrapped),
            URL_SAFE_NO_PAD.encode([0u8; 8])
        );
        assert!(decryptor.decrypt(body.as_bytes()).is_err());
    }

    #[test]
    fn tampered_payload_rejected() {
        let (decryptor, public, _) = keypair();
        let mut body = seal(&public, b"payload", true);
        let last = body.len() - 1;
        body[last] = if body[last] == b'A' { b'B' } else { b'A' };
        assert!(decryptor.decrypt(&body).is_err());
    }

    #[test]
    fn scheme_header_compare() {
        assert!(scheme_matches("RSA-AES"));
        assert!(!scheme_matches("rsa-aes"));
        assert!(!scheme_matches(""));
    }
}
