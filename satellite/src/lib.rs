pub mod access;
pub mod decode;
pub mod error;
pub mod gateway;
pub mod path_cipher;
pub mod webhook_crypto;

// re-export
pub use access::AccessGrant;
pub use decode::{decode_field, normalize_uuid};
pub use error::{SatelliteError, SatelliteResult};
pub use gateway::{ObjectMeta, ObjectStore, SatelliteGateway};
pub use path_cipher::PathCipher;
pub use webhook_crypto::{scheme_matches, WebhookDecryptor, ENCRYPTION_SCHEME};
