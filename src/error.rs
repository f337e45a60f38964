use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised by the GRB client.
#[derive(Debug, Error)]
pub enum Error {
    /// The call violated the caller contract (both/neither identifier kinds,
    /// invalid option combination, bad job parameters). Raised before any
    /// network activity.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The server could not resolve the supplied identifier.
    #[error("could not resolve object: {0}")]
    UnknownObject(String),

    /// The server replied with `OK: 0`.
    #[error("API call {api} failed: {message}")]
    Api { api: String, message: String },

    /// The reply did not carry keys the decoder needs.
    #[error("{context}: missing expected key(s): {}", .keys.join(", "))]
    MissingKeys { context: String, keys: Vec<String> },

    /// A key was present but its value had the wrong shape.
    #[error("{context}: malformed response: {detail}")]
    Malformed { context: String, detail: String },

    /// Non-success HTTP status.
    #[error("HTTP {status} for url ({url})\n{message}")]
    Http {
        status: u16,
        url: String,
        message: String,
    },

    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Refusing to overwrite an existing file with `clobber` disabled.
    #[error("{} already exists (set clobber to overwrite)", .0.display())]
    FileExists(PathBuf),

    #[error("I/O error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A job result was requested before the job reached the complete state.
    #[error("job {job} is not complete (status {code}: {text})")]
    JobNotComplete { job: String, code: i64, text: String },

    /// A per-object failure inside a multi-object request.
    #[error("{id}: {source}")]
    ForObject {
        id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Malformed {
            context: context.into(),
            detail: detail.into(),
        }
    }

    /// Strips any [`Error::ForObject`] wrapping.
    pub fn root(&self) -> &Error {
        match self {
            Error::ForObject { source, .. } => source.root(),
            other => other,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default, rename = "ERROR")]
    pub(crate) error: Option<String>,
    // Some front-ends respond with {"message":...,"detail":...}
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) detail: Option<String>,
}

pub(crate) fn format_http_error(status: StatusCode, url: &str, body: &str) -> Error {
    let message = match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(e) => {
            let title = e.error.or(e.message).unwrap_or_default();
            match e.detail {
                Some(detail) if !detail.is_empty() => format!("{title}\n{detail}"),
                _ => title,
            }
        }
        Err(_) => body.trim().to_string(),
    };

    let message = if status == StatusCode::NOT_FOUND {
        format!(
            "API endpoint not found; check the configured url (default {}).\n{}",
            crate::config::DEFAULT_URL,
            message
        )
    } else {
        message
    };

    Error::Http {
        status: status.as_u16(),
        url: url.to_string(),
        message,
    }
}
