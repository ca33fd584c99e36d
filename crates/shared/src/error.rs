use serde::{Deserialize, Serialize};

pub const UNKNOWN_ERROR_MESSAGE: &str =
    "An unknown error occurred. Please submit a bug report.";

pub const INVALID_CREDENTIALS_MESSAGE: &str = "Please provide a valid username and password.";

/// Error body returned by the dashboard API proxy (`{"Cause", "Message"}`) or
/// by the Docker daemon itself (`{"message"}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(rename = "Cause", alias = "cause", default)]
    pub cause: Option<String>,
    #[serde(rename = "Message", alias = "message", default)]
    pub message: Option<String>,
}

impl ApiErrorBody {
    /// Best-effort decode. Plain-text bodies become the message.
    pub fn from_slice(body: &[u8]) -> Self {
        if let Ok(parsed) = serde_json::from_slice::<Self>(body) {
            return parsed;
        }
        let text = String::from_utf8_lossy(body).trim().to_string();
        Self {
            cause: None,
            message: (!text.is_empty()).then_some(text),
        }
    }

    pub fn cause(&self) -> &str {
        self.cause.as_deref().unwrap_or("unknown")
    }

    pub fn user_message(&self) -> &str {
        self.message
            .as_deref()
            .filter(|message| !message.trim().is_empty())
            .unwrap_or(UNKNOWN_ERROR_MESSAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_proxy_envelope() {
        let body = ApiErrorBody::from_slice(br#"{"Cause":"docker","Message":"no such container"}"#);
        assert_eq!(body.cause(), "docker");
        assert_eq!(body.user_message(), "no such container");
    }

    #[test]
    fn reads_daemon_error_shape() {
        let body = ApiErrorBody::from_slice(br#"{"message":"conflict"}"#);
        assert_eq!(body.cause(), "unknown");
        assert_eq!(body.user_message(), "conflict");
    }

    #[test]
    fn falls_back_for_empty_or_unstructured_bodies() {
        assert_eq!(ApiErrorBody::from_slice(b"").user_message(), UNKNOWN_ERROR_MESSAGE);
        assert_eq!(ApiErrorBody::from_slice(b"{}").user_message(), UNKNOWN_ERROR_MESSAGE);
        assert_eq!(
            ApiErrorBody::from_slice(b"bad gateway\n").user_message(),
            "bad gateway"
        );
    }
}
