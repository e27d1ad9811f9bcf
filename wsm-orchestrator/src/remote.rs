//! Classification of HTTP failures from the broker and the cloud REST APIs.

use crate::error::OrchestratorError;
use reqwest::StatusCode;

/// Map a non-success status to the error taxonomy.
///
/// Throttling, 5xx and timeouts retry. 404 is `NotFound` and 409 is `DuplicateResource`, so
/// callers can treat them as idempotent outcomes. Everything else is fatal.
pub(crate) fn status_error(service: &str, status: StatusCode, body: &str) -> OrchestratorError {
    let message = format!("{} returned {}: {}", service, status, body.trim());
    match status {
        StatusCode::NOT_FOUND => OrchestratorError::NotFound(message),
        StatusCode::CONFLICT => OrchestratorError::DuplicateResource(message),
        StatusCode::BAD_REQUEST => OrchestratorError::InvalidInput(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => OrchestratorError::RetryableRemote(message),
        s if s.is_server_error() => OrchestratorError::RetryableRemote(message),
        _ => OrchestratorError::FatalRemote(message),
    }
}

/// Transport errors never reached the service, so they are worth another try.
pub(crate) fn transport_error(service: &str, err: reqwest::Error) -> OrchestratorError {
    if err.is_decode() {
        OrchestratorError::FatalRemote(format!("{} sent an unreadable response: {}", service, err))
    } else {
        OrchestratorError::RetryableRemote(format!("{} request failed: {}", service, err))
    }
}

/// Read the body of a failed response and classify it.
pub(crate) async fn response_error(service: &str, response: reqwest::Response) -> OrchestratorError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    status_error(service, status, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let retryable = [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ];
        for status in retryable {
            assert!(status_error("broker", status, "").is_retryable(), "{}", status);
        }

        assert!(matches!(
            status_error("broker", StatusCode::FORBIDDEN, "no"),
            OrchestratorError::FatalRemote(_)
        ));
        assert!(matches!(
            status_error("broker", StatusCode::BAD_REQUEST, "bad name"),
            OrchestratorError::InvalidInput(_)
        ));
        assert!(matches!(
            status_error("broker", StatusCode::NOT_FOUND, ""),
            OrchestratorError::NotFound(_)
        ));
        assert!(matches!(
            status_error("broker", StatusCode::CONFLICT, ""),
            OrchestratorError::DuplicateResource(_)
        ));
    }

    #[test]
    fn test_message_keeps_remote_text() {
        let err = status_error("storage", StatusCode::FORBIDDEN, "  quota exceeded \n");
        assert!(err.to_string().contains("quota exceeded"));
    }
}
