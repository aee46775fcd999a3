use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{SatelliteError, SatelliteResult};

/// A parsed access grant: satellite endpoint, gateway credentials and the
/// root secret the per-path keys are derived from. Grants travel as
/// `base64url(JSON)` in the `ACCESS_TOKEN` header and the job row, and are
/// parsed afresh on every satellite call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    /// S3-compatible endpoint of the satellite gateway.
    pub satellite: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Root secret for the path cipher's derived keys.
    pub root_secret: String,
    /// The satellite project this grant is scoped to; doubles as the
    /// user id webhook events refer to.
    #[serde(default)]
    pub project_id: String,
}

impl AccessGrant {
    pub fn parse(serialized: &str) -> SatelliteResult<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(serialized.trim())
            .map_err(|e| SatelliteError::InvalidAccessGrant(e.to_string()))?;
        let grant: AccessGrant = serde_json::from_slice(&raw)
            .map_err(|e| SatelliteError::InvalidAccessGrant(e.to_string()))?;
        if grant.satellite.is_empty() {
            return Err(SatelliteError::InvalidAccessGrant(
                "missing satellite endpoint".into(),
            ));
        }
        if grant.access_key_id.is_empty() || grant.secret_access_key.is_empty() {
            return Err(SatelliteError::InvalidAccessGrant("missing credentials".into()));
        }
        Ok(grant)
    }

    pub fn serialize(&self) -> SatelliteResult<String> {
        let raw = serde_json::to_vec(self)
            .map_err(|e| SatelliteError::InvalidAccessGrant(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(raw))
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
            root_secret: "root".into(),
            project_id: "0f9cf1f0-9ab7-4f2c-8e11-7c51d7a2c201".into(),
        }
    }

    #[test]
    fn grant_roundtrips() {
        let serialized = grant().serialize().unwrap();
        assert_eq!(AccessGrant::parse(&serialized).unwrap(), grant());
    }

    #[test]
    fn grant_rejects_garbage() {
        assert!(AccessGrant::parse("not base64!!").is_err());
        assert!(AccessGrant::parse(&URL_SAFE_NO_PAD.encode(b"{}")).is_err());
    }

    #[test]
    fn grant_rejects_missing_endpoint() {
        let mut g = grant();
        g.satellite = String::new();
        let serialized = g.serialize().unwrap();
        assert!(AccessGrant::parse(&serialized).is_err());
    }
}
