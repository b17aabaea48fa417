use thiserror::Error;

/// Everything that can terminate a read stream or a write sink.
#[derive(Error, Debug)]
pub enum Error {
    #[error("token acquisition failed: {0:#}")]
    Auth(#[source] anyhow::Error),

    /// The store answered with a status of 300 or above. `reason` is the phrase the
    /// server sent, or the standard one for the code; it is empty for unknown codes.
    #[error("[{status}]{}", spaced(.reason))]
    HttpStatus { status: u16, reason: String },

    #[error("no header exists")]
    HeaderMissing,

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed cell feed: {0}")]
    MalformedFeed(String),

    #[error("xml: {0}")]
    Xml(String),

    #[error("{0}")]
    Url(#[from] url::ParseError),

    #[error("config: {0}")]
    Config(String),

    #[error("writer already closed")]
    WriterClosed,

    /// The batch was cancelled before its closing tag went out.
    #[error("batch aborted")]
    Aborted,

    #[error("write task failed: {0}")]
    WriteTask(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;

fn spaced(reason: &str) -> String {
    if reason.is_empty() {
        String::new()
    } else {
        format!(" {}", reason)
    }
}

impl Error {
    /// Status code of an `HttpStatus` error, if that is what this is.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_status_display() {
        let known = Error::HttpStatus {
            status: 403,
            reason: "Forbidden".into(),
        };
        assert_eq!(known.to_string(), "[403] Forbidden");

        let unknown = Error::HttpStatus {
            status: 599,
            reason: String::new(),
        };
        assert_eq!(unknown.to_string(), "[599]");
    }

    #[test]
    fn test_auth_keeps_source_chain() {
        let cause = anyhow::anyhow!("refresh token expired").context("token endpoint");
        let err = Error::Auth(cause);
        assert_eq!(
            err.to_string(),
            "token acquisition failed: token endpoint: refresh token expired"
        );
        let source = err.source().expect("auth error has a source");
        assert_eq!(source.to_string(), "token endpoint");
    }
}
