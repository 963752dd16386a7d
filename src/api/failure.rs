//! Classification of failed backend requests

/// Why a request did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestFailure {
    /// Connection refused, DNS, reset and similar
    Network,
    /// Request or gateway timeout
    Timeout,
    /// HTTP 429
    RateLimited,
    /// HTTP 401/403
    AuthError(u16),
    /// Other 4xx; the backend refused the action itself
    ClientError(u16),
    /// HTTP 5xx
    ServerError(u16),
    Unknown,
}

impl RequestFailure {
    /// Whether a later attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            RequestFailure::Network
            | RequestFailure::Timeout
            | RequestFailure::RateLimited
            | RequestFailure::ServerError(_) => true,
            RequestFailure::AuthError(_) | RequestFailure::ClientError(_) | RequestFailure::Unknown => false,
        }
    }

    pub fn from_status_code(status: u16) -> Self {
        match status {
            408 | 504 => RequestFailure::Timeout,
            429 => RequestFailure::RateLimited,
            401 | 403 => RequestFailure::AuthError(status),
            400..=499 => RequestFailure::ClientError(status),
            500..=599 => RequestFailure::ServerError(status),
            _ => RequestFailure::Unknown,
        }
    }

    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            RequestFailure::Timeout
        } else if error.is_connect() || error.is_request() {
            RequestFailure::Network
        } else if let Some(status) = error.status() {
            Self::from_status_code(status.as_u16())
        } else {
            RequestFailure::Unknown
        }
    }
}

impl std::fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestFailure::Network => write!(f, "network error"),
            RequestFailure::Timeout => write!(f, "timed out"),
            RequestFailure::RateLimited => write!(f, "rate limited"),
            RequestFailure::AuthError(status) => write!(f, "not authorized (HTTP {})", status),
            RequestFailure::ClientError(status) => write!(f, "rejected (HTTP {})", status),
            RequestFailure::ServerError(status) => write!(f, "server error (HTTP {})", status),
            RequestFailure::Unknown => write!(f, "unknown failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(RequestFailure::from_status_code(408), RequestFailure::Timeout);
        assert_eq!(RequestFailure::from_status_code(504), RequestFailure::Timeout);
        assert_eq!(RequestFailure::from_status_code(429), RequestFailure::RateLimited);
        assert_eq!(RequestFailure::from_status_code(401), RequestFailure::AuthError(401));
        assert_eq!(RequestFailure::from_status_code(409), RequestFailure::ClientError(409));
        assert_eq!(RequestFailure::from_status_code(503), RequestFailure::ServerError(503));
        assert_eq!(RequestFailure::from_status_code(302), RequestFailure::Unknown);
    }

    #[test]
    fn test_transient_failures() {
        assert!(RequestFailure::Network.is_transient());
        assert!(RequestFailure::ServerError(502).is_transient());
        assert!(RequestFailure::RateLimited.is_transient());
        assert!(!RequestFailure::ClientError(422).is_transient());
        assert!(!RequestFailure::AuthError(403).is_transient());
    }
}
