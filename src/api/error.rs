//! MEGA API error codes.

use crate::error::{AuthError, LinkError, MegaError};

/// MEGA API error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    /// Internal error
    Internal = -1,
    /// Invalid arguments
    Args = -2,
    /// Try again
    Again = -3,
    /// Rate limit exceeded
    RateLimit = -4,
    /// Upload failed
    Failed = -5,
    /// Too many IPs
    TooManyIps = -6,
    /// Access denied
    AccessDenied = -7,
    /// Resource already exists
    Exist = -8,
    /// Resource does not exist
    NotExist = -9,
    /// Circular linking
    Circular = -10,
    /// Access violation
    AccessViolation = -11,
    /// Application key required
    AppKey = -12,
    /// Session expired
    Expired = -13,
    /// Not confirmed
    NotConfirmed = -14,
    /// Resource blocked
    Blocked = -15,
    /// Over quota
    OverQuota = -16,
    /// Temporarily unavailable
    TempUnavail = -17,
    /// Too many connections
    TooManyConnections = -18,
    /// Unknown error
    Unknown = -9999,
}

impl From<i64> for ApiErrorCode {
    fn from(code: i64) -> Self {
        match code {
            -1 => ApiErrorCode::Internal,
            -2 => ApiErrorCode::Args,
            -3 => ApiErrorCode::Again,
            -4 => ApiErrorCode::RateLimit,
            -5 => ApiErrorCode::Failed,
            -6 => ApiErrorCode::TooManyIps,
            -7 => ApiErrorCode::AccessDenied,
            -8 => ApiErrorCode::Exist,
            -9 => ApiErrorCode::NotExist,
            -10 => ApiErrorCode::Circular,
            -11 => ApiErrorCode::AccessViolation,
            -12 => ApiErrorCode::AppKey,
            -13 => ApiErrorCode::Expired,
            -14 => ApiErrorCode::NotConfirmed,
            -15 => ApiErrorCode::Blocked,
            -16 => ApiErrorCode::OverQuota,
            -17 => ApiErrorCode::TempUnavail,
            -18 => ApiErrorCode::TooManyConnections,
            _ => ApiErrorCode::Unknown,
        }
    }
}

impl ApiErrorCode {
    /// Get human-readable description of the error.
    pub fn description(&self) -> &'static str {
        match self {
            ApiErrorCode::Internal => "Internal error",
            ApiErrorCode::Args => "Invalid arguments",
            ApiErrorCode::Again => "Try again",
            ApiErrorCode::RateLimit => "Rate limit exceeded",
            ApiErrorCode::Failed => "Upload failed",
            ApiErrorCode::TooManyIps => "Too many IPs",
            ApiErrorCode::AccessDenied => "Access denied",
            ApiErrorCode::Exist => "Resource already exists",
            ApiErrorCode::NotExist => "Resource does not exist",
            ApiErrorCode::Circular => "Circular linking",
            ApiErrorCode::AccessViolation => "Access violation",
            ApiErrorCode::AppKey => "Application key required",
            ApiErrorCode::Expired => "Session expired",
            ApiErrorCode::NotConfirmed => "Not confirmed",
            ApiErrorCode::Blocked => "Resource blocked",
            ApiErrorCode::OverQuota => "Over quota",
            ApiErrorCode::TempUnavail => "Temporarily unavailable",
            ApiErrorCode::TooManyConnections => "Too many connections",
            ApiErrorCode::Unknown => "Unknown error",
        }
    }

    /// Whether the request may be repeated unchanged after a pause.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiErrorCode::Again
                | ApiErrorCode::RateLimit
                | ApiErrorCode::TempUnavail
                | ApiErrorCode::TooManyConnections
        )
    }

    /// Generic mapping into the error taxonomy; callers with path context
    /// translate `Exist`/`NotExist` themselves.
    pub fn into_error(self, raw: i64) -> MegaError {
        match self {
            ApiErrorCode::Again
            | ApiErrorCode::RateLimit
            | ApiErrorCode::TempUnavail
            | ApiErrorCode::TooManyConnections => MegaError::RateLimited,
            ApiErrorCode::Expired => MegaError::Auth(AuthError::SessionExpired),
            _ => MegaError::Service {
                code: raw,
                message: self.description().to_string(),
            },
        }
    }
}

impl MegaError {
    /// The API code behind a service error, if any.
    pub fn api_code(&self) -> Option<ApiErrorCode> {
        match self.root_cause() {
            MegaError::Service { code, .. } => Some(ApiErrorCode::from(*code)),
            MegaError::Auth(AuthError::SessionExpired) => Some(ApiErrorCode::Expired),
            MegaError::RateLimited => Some(ApiErrorCode::Again),
            _ => None,
        }
    }

    /// Translate "does not exist" into [`MegaError::NotFound`] for `path`.
    pub(crate) fn with_path(self, path: &str) -> MegaError {
        match self.api_code() {
            Some(ApiErrorCode::NotExist) => MegaError::not_found(path),
            Some(ApiErrorCode::Exist) => MegaError::AlreadyExists {
                path: path.to_string(),
            },
            _ => self,
        }
    }

    /// Translate service errors seen while resolving a public link.
    pub(crate) fn into_link_error(self) -> MegaError {
        match self.api_code() {
            Some(ApiErrorCode::NotExist) | Some(ApiErrorCode::Blocked) => {
                MegaError::Link(LinkError::Revoked)
            }
            Some(ApiErrorCode::Expired) => MegaError::Link(LinkError::Expired),
            _ => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(ApiErrorCode::from(-3), ApiErrorCode::Again);
        assert_eq!(ApiErrorCode::from(-9), ApiErrorCode::NotExist);
        assert_eq!(ApiErrorCode::from(-15), ApiErrorCode::Blocked);
        assert_eq!(ApiErrorCode::from(-18), ApiErrorCode::TooManyConnections);
        assert_eq!(ApiErrorCode::from(-999), ApiErrorCode::Unknown);
    }

    #[test]
    fn test_taxonomy_mapping() {
        assert!(matches!(
            ApiErrorCode::Again.into_error(-3),
            MegaError::RateLimited
        ));
        assert!(matches!(
            ApiErrorCode::Expired.into_error(-13),
            MegaError::Auth(AuthError::SessionExpired)
        ));
        match ApiErrorCode::AccessDenied.into_error(-7) {
            MegaError::Service { code, message } => {
                assert_eq!(code, -7);
                assert_eq!(message, "Access denied");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_path_and_link_translation() {
        let missing = ApiErrorCode::NotExist.into_error(-9);
        assert!(matches!(
            missing.with_path("/Root/x"),
            MegaError::NotFound { path } if path == "/Root/x"
        ));

        let blocked = ApiErrorCode::Blocked.into_error(-15);
        assert!(matches!(
            blocked.into_link_error(),
            MegaError::Link(LinkError::Revoked)
        ));
    }
}
