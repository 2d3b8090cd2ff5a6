//! Response shaping and failure classification for the HTTP surface.

use axum::http::StatusCode;
use qy_core::{Document, Error};

/// Result set after truncation.
#[derive(Debug)]
pub struct Shaped {
    pub results: Vec<Document>,
    pub total: usize,
    pub truncated: bool,
}

/// Cut result sets larger than `above` down to their first `to` records.
pub fn shape_results(mut results: Vec<Document>, above: usize, to: usize) -> Shaped {
    let total = results.len();
    let truncated = total > above;
    if truncated {
        results.truncate(to);
    }
    Shaped {
        results,
        total,
        truncated,
    }
}

// =============================================================================
// Failure classification
// =============================================================================

/// Substrings that mark a reasoning-service quota or rate-limit failure.
/// Matched case-insensitively.
pub const QUOTA_MARKERS: &[&str] = &["429", "quota", "rate limit", "resource_exhausted"];

pub const QUOTA_MESSAGE: &str =
    "The reasoning service quota or rate limit was reached. Please wait a moment and try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Quota,
    Unavailable,
    Internal,
}

impl FailureClass {
    pub fn status(self) -> StatusCode {
        match self {
            Self::Quota => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The only place quota failures are recognized. Store errors are never
/// quota errors, even when their text happens to contain a marker.
pub fn classify_failure(err: &Error) -> FailureClass {
    match err {
        Error::Connection(_) => FailureClass::Unavailable,
        Error::Translation(msg) | Error::Repair(msg) | Error::Reasoning(msg)
            if is_quota_message(msg) =>
        {
            FailureClass::Quota
        }
        _ => FailureClass::Internal,
    }
}

fn is_quota_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    QUOTA_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qy_core::Value;

    fn records(n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| {
                let mut d = Document::new();
                d.insert("i", Value::Int(i as i64));
                d
            })
            .collect()
    }

    #[test]
    fn test_truncation_bounds() {
        let shaped = shape_results(records(201), 200, 50);
        assert_eq!(shaped.results.len(), 50);
        assert_eq!(shaped.total, 201);
        assert!(shaped.truncated);
        assert_eq!(shaped.results[49].get("i"), Some(&Value::Int(49)));

        let shaped = shape_results(records(200), 200, 50);
        assert_eq!(shaped.results.len(), 200);
        assert!(!shaped.truncated);

        let shaped = shape_results(records(150), 200, 50);
        assert_eq!(shaped.results.len(), 150);
        assert_eq!(shaped.total, 150);
    }

    #[test]
    fn test_quota_classification() {
        let cases = [
            Error::Translation("Reasoning service error: status 429: slow down".into()),
            Error::Repair("You exceeded your current QUOTA".into()),
            Error::Reasoning("Rate limit reached for model".into()),
            Error::Translation("RESOURCE_EXHAUSTED".into()),
        ];
        for err in &cases {
            assert_eq!(classify_failure(err), FailureClass::Quota, "{}", err);
        }
        assert_eq!(FailureClass::Quota.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_other_failures() {
        assert_eq!(
            classify_failure(&Error::Translation("response is not valid JSON".into())),
            FailureClass::Internal
        );
        assert_eq!(
            classify_failure(&Error::Execution {
                attempts: 2,
                message: "limit must be 429 or less".into()
            }),
            FailureClass::Internal
        );
        assert_eq!(
            classify_failure(&Error::Connection("refused".into())),
            FailureClass::Unavailable
        );
    }
}
