//! Core types for blobway

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Outcome status of a completed operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Success,
    /// Reserved for partial-success states. Failures are currently reported
    /// as [`Error`] values, never through this variant.
    Failure,
}

/// Normalized result of a completed backend call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationResult {
    pub status: ResultStatus,
    /// Blob count, set by list operations only.
    #[serde(rename = "numEntries", skip_serializing_if = "Option::is_none")]
    pub num_entries: Option<usize>,
}

impl OperationResult {
    pub fn success() -> Self {
        Self {
            status: ResultStatus::Success,
            num_entries: None,
        }
    }

    pub fn listed(num_entries: usize) -> Self {
        Self {
            status: ResultStatus::Success,
            num_entries: Some(num_entries),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

/// Account name and access key an adapter is bound to
#[derive(Clone, PartialEq, Eq)]
pub struct AccountCredentials {
    account: String,
    access_key: String,
}

impl AccountCredentials {
    pub fn new(account: impl Into<String>, access_key: impl Into<String>) -> Result<Self> {
        let account = account.into();
        let access_key = access_key.into();

        if account.trim().is_empty() {
            return Err(Error::configuration("storage account must not be empty"));
        }
        if access_key.trim().is_empty() {
            return Err(Error::configuration("access key must not be empty"));
        }

        Ok(Self {
            account,
            access_key,
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }
}

impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("account", &self.account)
            .field("access_key", &"<redacted>")
            .finish()
    }
}

/// A blob as reported by a container listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobEntry {
    pub name: String,
    pub size: u64,
}

/// Byte range with an inclusive end; `end: None` reads to the end of the blob
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Render as an HTTP `Range` header value.
    pub fn to_header(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// Download options, forwarded to the backend untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    pub range: Option<ByteRange>,
}

/// Delete options, forwarded to the backend untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteOptions {
    pub version_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_serializes_like_the_wire_shape() {
        let json = serde_json::to_value(OperationResult::success()).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "SUCCESS" }));

        let json = serde_json::to_value(OperationResult::listed(3)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "status": "SUCCESS", "numEntries": 3 })
        );
    }

    #[test]
    fn credentials_reject_blank_values() {
        assert!(matches!(
            AccountCredentials::new("", "key"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            AccountCredentials::new("account", "   "),
            Err(Error::Configuration(_))
        ));
        assert!(AccountCredentials::new("account", "key").is_ok());
    }

    #[test]
    fn credentials_debug_hides_key() {
        let creds = AccountCredentials::new("account", "s3cr3t").unwrap();
        let debug = format!("{creds:?}");
        assert!(debug.contains("account"));
        assert!(!debug.contains("s3cr3t"));
    }

    #[test]
    fn byte_range_header() {
        let closed = ByteRange {
            start: 0,
            end: Some(99),
        };
        assert_eq!(closed.to_header(), "bytes=0-99");

        let open = ByteRange {
            start: 10,
            end: None,
        };
        assert_eq!(open.to_header(), "bytes=10-");
    }
}
