// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Error Taxonomy and Remote Error Translation
//!
//! Every operation of the orchestrator fails with a [`ProvisioningError`]
//! carrying a stable [`Code`]. Remote calls fail with a [`CloudError`], which
//! is translated exactly once, at the boundary where the remote API was
//! invoked, by [`translate_cloud_error`].
//!
//! | HTTP status | Code |
//! |-------------|------|
//! | 400 | `InvalidArgument` |
//! | 409 | `ResourceExhausted` (quota phrase) / `InvalidArgument` |
//! | 404 | `NotFound` |
//! | 403 | `PermissionDenied` |
//! | 401 | `Unauthenticated` |
//! | 429 | `Unavailable` |
//! | other 4xx | `InvalidArgument` |
//! | 500 | `Internal` |
//! | 502, 503 | `Unavailable` |
//! | 504 | `DeadlineExceeded` |
//! | other 5xx | `Unknown` |

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, error};

/// Phrase the storage cache resource provider uses when a subscription runs
/// out of AMLFS quota. Conflicts carrying it are quota failures, not bad input.
pub const QUOTA_EXCEEDED_PHRASE: &str =
    "Operation results in exceeding quota limits of resource type AmlFilesystem";

/// Stable outcome classification returned to the plugin-protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    InvalidArgument,
    Aborted,
    ResourceExhausted,
    NotFound,
    PermissionDenied,
    Unauthenticated,
    FailedPrecondition,
    DeadlineExceeded,
    Unavailable,
    Internal,
    /// Unclassified remote failure. Deliberately not `Internal` so that a
    /// caller's generic retry policy still applies.
    Unknown,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::InvalidArgument => "InvalidArgument",
            Code::Aborted => "Aborted",
            Code::ResourceExhausted => "ResourceExhausted",
            Code::NotFound => "NotFound",
            Code::PermissionDenied => "PermissionDenied",
            Code::Unauthenticated => "Unauthenticated",
            Code::FailedPrecondition => "FailedPrecondition",
            Code::DeadlineExceeded => "DeadlineExceeded",
            Code::Unavailable => "Unavailable",
            Code::Internal => "Internal",
            Code::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error already expressed in the orchestrator's taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ProvisioningError {
    code: Code,
    message: String,
}

impl ProvisioningError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(Code::Aborted, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Code::Unknown, message)
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prefix the message with caller context, keeping the code.
    pub fn with_context(self, context: impl fmt::Display) -> Self {
        Self {
            code: self.code,
            message: format!("{}: {}", context, self.message),
        }
    }
}

/// Failure raised by a remote collaborator before translation.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The remote API answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Response {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// A long-running operation reached a terminal state other than success.
    #[error("operation ended with status {status}: {message}")]
    OperationFailed {
        status: String,
        message: String,
    },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("request was cancelled by the caller")]
    Cancelled,

    #[error("caller deadline exceeded")]
    DeadlineExceeded,

    /// Already translated; passes through the translator unchanged.
    #[error(transparent)]
    Status(#[from] ProvisioningError),
}

impl CloudError {
    pub fn response(status: u16, message: impl Into<String>) -> Self {
        CloudError::Response {
            status,
            code: None,
            message: message.into(),
        }
    }
}

/// Map a remote failure onto the taxonomy.
pub fn translate_cloud_error(err: CloudError) -> ProvisioningError {
    let code = match err {
        CloudError::Status(inner) => {
            debug!("error is already translated: {}", inner);
            return inner;
        }
        CloudError::Response {
            status,
            ref message,
            ..
        } => code_for_status(status, message),
        CloudError::OperationFailed { ref message, .. } => {
            if message.contains(QUOTA_EXCEEDED_PHRASE) {
                Code::ResourceExhausted
            } else {
                Code::Unknown
            }
        }
        CloudError::Http(ref e) if e.is_timeout() => Code::DeadlineExceeded,
        CloudError::Http(_) | CloudError::Decode(_) => Code::Unknown,
        CloudError::Cancelled | CloudError::DeadlineExceeded => Code::DeadlineExceeded,
    };

    error!(code = %code, "remote call failed: {}", err);
    ProvisioningError::new(code, format!("error occurred calling API: {}", err))
}

fn code_for_status(status: u16, message: &str) -> Code {
    match status {
        400 => Code::InvalidArgument,
        409 if message.contains(QUOTA_EXCEEDED_PHRASE) => Code::ResourceExhausted,
        409 => Code::InvalidArgument,
        404 => Code::NotFound,
        403 => Code::PermissionDenied,
        401 => Code::Unauthenticated,
        429 => Code::Unavailable,
        400..=499 => Code::InvalidArgument,
        500 => Code::Internal,
        502 | 503 => Code::Unavailable,
        504 => Code::DeadlineExceeded,
        _ => Code::Unknown,
    }
}

impl From<CloudError> for ProvisioningError {
    fn from(err: CloudError) -> Self {
        translate_cloud_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_translate() {
        let cases = [
            (400, Code::InvalidArgument),
            (401, Code::Unauthenticated),
            (403, Code::PermissionDenied),
            (404, Code::NotFound),
            (409, Code::InvalidArgument),
            (418, Code::InvalidArgument),
            (429, Code::Unavailable),
            (500, Code::Internal),
            (502, Code::Unavailable),
            (503, Code::Unavailable),
            (504, Code::DeadlineExceeded),
            (599, Code::Unknown),
        ];

        for (status, expected) in cases {
            let translated = translate_cloud_error(CloudError::response(status, "boom"));
            assert_eq!(translated.code(), expected, "status {}", status);
            assert!(translated.message().contains("boom"));
        }
    }

    #[test]
    fn test_conflict_with_quota_phrase_is_resource_exhausted() {
        let err = CloudError::Response {
            status: 409,
            code: Some("Conflict".to_string()),
            message: format!("{} in subscription", QUOTA_EXCEEDED_PHRASE),
        };
        assert_eq!(translate_cloud_error(err).code(), Code::ResourceExhausted);
    }

    #[test]
    fn test_translated_error_passes_through_unchanged() {
        let original = ProvisioningError::failed_precondition("subnet missing");
        let translated = translate_cloud_error(CloudError::Status(original.clone()));
        assert_eq!(translated, original);
    }

    #[test]
    fn test_cancellation_is_deadline_exceeded() {
        assert_eq!(
            translate_cloud_error(CloudError::Cancelled).code(),
            Code::DeadlineExceeded
        );
        assert_eq!(
            translate_cloud_error(CloudError::DeadlineExceeded).code(),
            Code::DeadlineExceeded
        );
    }

    #[test]
    fn test_unclassified_failures_are_unknown() {
        assert_eq!(
            translate_cloud_error(CloudError::Decode("bad json".to_string())).code(),
            Code::Unknown
        );
        let failed = CloudError::OperationFailed {
            status: "Failed".to_string(),
            message: "deployment failed".to_string(),
        };
        assert_eq!(translate_cloud_error(failed).code(), Code::Unknown);
    }

    #[test]
    fn test_with_context_keeps_code() {
        let err = ProvisioningError::resource_exhausted("no room").with_context("CreateVolume");
        assert_eq!(err.code(), Code::ResourceExhausted);
        assert_eq!(err.message(), "CreateVolume: no room");
    }
}
