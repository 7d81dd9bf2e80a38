//! The error taxonomy from the daemon's design: kinds, not ad hoc strings.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Any peer or mirror I/O that failed, timed out, or returned a
    /// non-2xx (other than 401/403) on a single attempt. Callers move on
    /// to the next candidate; this is never propagated across a whole
    /// `file_add`/`repo_add` call.
    #[error("transport error talking to {endpoint}: {source:#}")]
    Transport {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    /// Resource absent in cache, registry, or on disk.
    #[error("not found: {0}")]
    NotFound(String),

    /// The origin refused the request due to credentials (gated repo:
    /// a 401 or 403 on a resolve/download attempt). Unlike `Transport`,
    /// this aborts the whole `file_add` call rather than falling
    /// through to the next candidate endpoint: no other endpoint is
    /// going to hold credentials the caller doesn't have.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed input from a caller: bad range header, bad peer address.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The daemon is already running, or the port is in use.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unrecoverable misconfiguration discovered at startup.
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn transport(endpoint: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Error::Transport {
            endpoint: endpoint.into(),
            source: source.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Error::Unauthorized(message.into())
    }
}
