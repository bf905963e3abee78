//! HTTP transport shared by all providers.

pub mod http;

pub use http::HttpTransport;

use std::io::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Connection reset, refused, aborted, or timed out.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Http(e) => {
                e.is_timeout() || e.is_connect() || has_transient_io_source(e)
            }
            TransportError::Io(e) => is_transient_io_kind(e.kind()),
            TransportError::Other(_) => false,
        }
    }
}

fn is_transient_io_kind(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}

// reqwest buries the socket error a few levels deep (hyper -> io).
fn has_transient_io_source(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if is_transient_io_kind(io.kind()) {
                return true;
            }
        }
        source = e.source();
    }
    false
}
