use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The backup source kind. Keys the processor map and decides the
/// destination bucket.
#[derive(
    PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Deserialize, Serialize, Hash, ToSchema,
)]
pub enum Method {
    #[serde(rename = "gmail")]
    Gmail,
    #[serde(rename = "outlook")]
    Outlook,
    #[serde(rename = "google-drive")]
    GoogleDrive,
    #[serde(rename = "google-photos")]
    GooglePhotos,
    #[serde(rename = "google-cloud")]
    GoogleCloud,
    #[serde(rename = "dropbox")]
    Dropbox,
    #[serde(rename = "aws-s3")]
    AwsS3,
    #[serde(rename = "github")]
    Github,
    #[serde(rename = "shopify")]
    Shopify,
    #[serde(rename = "quickbooks")]
    Quickbooks,
    #[serde(rename = "psql_database")]
    PsqlDatabase,
    #[serde(rename = "mysql_database")]
    MysqlDatabase,
    /// Engine-agnostic alias accepted on job creation; the concrete engine
    /// is read from the connection credentials.
    #[serde(rename = "database")]
    Database,
}

impl Method {
    /// All methods the scheduler can dispatch.
    pub const ALL: [Method; 13] = [
        Method::Gmail,
        Method::Outlook,
        Method::GoogleDrive,
        Method::GooglePhotos,
        Method::GoogleCloud,
        Method::Dropbox,
        Method::AwsS3,
        Method::Github,
        Method::Shopify,
        Method::Quickbooks,
        Method::PsqlDatabase,
        Method::MysqlDatabase,
        Method::Database,
    ];

    /// Destination bucket in the satellite for this method.
    pub fn bucket(&self) -> &'static str {
        match self {
            Method::Gmail => "gmail",
            Method::Outlook => "outlook",
            Method::GoogleDrive => "google-drive",
            Method::GooglePhotos => "google-photos",
            Method::GoogleCloud => "google-cloud",
            Method::Dropbox => "dropbox",
            Method::AwsS3 => "aws-s3",
            Method::Github => "github",
            Method::Shopify => "shopify",
            Method::Quickbooks => "quickbooks",
            Method::PsqlDatabase | Method::MysqlDatabase | Method::Database => "database",
        }
    }

    /// Reverse of [`Method::bucket`], used by the webhook reconciler to map
    /// a satellite bucket back to the backup method that owns it.
    pub fn from_bucket(bucket: &str) -> Option<Method> {
        match bucket {
            "gmail" => Some(Method::Gmail),
            "outlook" => Some(Method::Outlook),
            "google-drive" => Some(Method::GoogleDrive),
            "google-photos" => Some(Method::GooglePhotos),
            "google-cloud" => Some(Method::GoogleCloud),
            "dropbox" => Some(Method::Dropbox),
            "aws-s3" => Some(Method::AwsS3),
            "github" => Some(Method::Github),
            "shopify" => Some(Method::Shopify),
            "quickbooks" => Some(Method::Quickbooks),
            "database" => Some(Method::Database),
            _ => None,
        }
    }

    /// Whether this method authenticates through an OAuth refresh token.
    /// Such adapters must surface `ProcessorError::AuthExpired` when the
    /// token is rejected.
    pub fn is_oauth(&self) -> bool {
        matches!(
            self,
            Method::Gmail
                | Method::Outlook
                | Method::GoogleDrive
                | Method::GooglePhotos
                | Method::GoogleCloud
        )
    }

    /// Whether this method backs up a SQL database via a dump child process.
    pub fn is_database(&self) -> bool {
        matches!(
            self,
            Method::PsqlDatabase | Method::MysqlDatabase | Method::Database
        )
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Method::Gmail => "gmail",
            Method::Outlook => "outlook",
            Method::GoogleDrive => "google-drive",
            Method::GooglePhotos => "google-photos",
            Method::GoogleCloud => "google-cloud",
            Method::Dropbox => "dropbox",
            Method::AwsS3 => "aws-s3",
            Method::Github => "github",
            Method::Shopify => "shopify",
            Method::Quickbooks => "quickbooks",
            Method::PsqlDatabase => "psql_database",
            Method::MysqlDatabase => "mysql_database",
            Method::Database => "database",
        })
    }
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gmail" => Ok(Method::Gmail),
            "outlook" => Ok(Method::Outlook),
            "google-drive" => Ok(Method::GoogleDrive),
            "google-photos" => Ok(Method::GooglePhotos),
            "google-cloud" => Ok(Method::GoogleCloud),
            "dropbox" => Ok(Method::Dropbox),
            "aws-s3" => Ok(Method::AwsS3),
            "github" => Ok(Method::Github),
            "shopify" => Ok(Method::Shopify),
            "quickbooks" => Ok(Method::Quickbooks),
            "psql_database" => Ok(Method::PsqlDatabase),
            "mysql_database" => Ok(Method::MysqlDatabase),
            "database" => Ok(Method::Database),
            _ => Err(format!("Unknown backup method {}", s)),
        }
    }
}

impl TryFrom<String> for Method {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Derive the `(source, type)` pair recorded in the sync ledger from a
/// bucket name. Google-family buckets collapse into one `google` source;
/// everything else uses the bucket name itself.
pub fn source_and_type(bucket: &str) -> (String, String) {
    match bucket {
        "gmail" => ("google".to_string(), "gmail".to_string()),
        "google-photos" => ("google".to_string(), "photos".to_string()),
        "google-drive" => ("google".to_string(), "drive".to_string()),
        b if b.starts_with("google-") => (
            "google".to_string(),
            b.trim_start_matches("google-").to_string(),
        ),
        b => (b.to_string(), b.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn method_roundtrips_through_str() {
        for method in Method::ALL {
            assert_eq!(Method::from_str(&method.to_string()), Ok(method));
        }
    }

    #[test]
    fn database_methods_share_a_bucket() {
        assert_eq!(Method::PsqlDatabase.bucket(), "database");
        assert_eq!(Method::MysqlDatabase.bucket(), "database");
        assert_eq!(Method::from_bucket("database"), Some(Method::Database));
    }

    #[test]
    fn google_family_collapses_to_one_source() {
        assert_eq!(
            source_and_type("gmail"),
            ("google".to_string(), "gmail".to_string())
        );
        assert_eq!(
            source_and_type("google-photos"),
            ("google".to_string(), "photos".to_string())
        );
        assert_eq!(
            source_and_type("google-cloud"),
            ("google".to_string(), "cloud".to_string())
        );
        assert_eq!(
            source_and_type("dropbox"),
            ("dropbox".to_string(), "dropbox".to_string())
        );
    }

    #[test]
    fn unknown_bucket_has_no_method() {
        assert_eq!(Method::from_bucket("tapes"), None);
    }
}
