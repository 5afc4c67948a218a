use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("platform API returned {status} for {operation}: {message}")]
    Api {
        operation: String,
        status: u16,
        code: Option<u64>,
        message: String,
    },
    #[error("{operation}: resource not found")]
    NotFound { operation: String },
    #[error("{operation}: missing permissions")]
    Forbidden { operation: String },
    #[error("{operation}: rate limited, retry after {retry_after_ms}ms")]
    RateLimited { operation: String, retry_after_ms: u64 },
    #[error("failed to decode platform response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid platform request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<u64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    retry_after: Option<f64>,
}

impl PlatformError {
    /// Maps a non-success HTTP status and body to an error.
    pub fn from_status(operation: &str, status: u16, body: &str) -> Self {
        let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
        let operation = operation.to_string();
        match status {
            404 => Self::NotFound { operation },
            403 => Self::Forbidden { operation },
            429 => {
                let seconds = parsed.as_ref().and_then(|b| b.retry_after).unwrap_or(1.0);
                Self::RateLimited {
                    operation,
                    retry_after_ms: (seconds * 1000.0).ceil() as u64,
                }
            }
            _ => {
                let (code, message) = match parsed {
                    Some(ErrorBody { code, message, .. }) => {
                        (code, message.unwrap_or_else(|| fallback_message(code)))
                    }
                    None => (None, body_excerpt(body.to_string())),
                };
                Self::Api {
                    operation,
                    status,
                    code,
                    message,
                }
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

fn fallback_message(code: Option<u64>) -> String {
    code.map(|c| format!("error code {c}"))
        .unwrap_or_else(|| "no error message".to_string())
}

fn body_excerpt(mut text: String) -> String {
    if text.len() > 200 {
        let mut cut = 200;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}
