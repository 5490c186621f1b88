//! Error types for fetching and registry loading
//!
//! These are the structured failures callers branch on. Orchestration and
//! persistence code uses `anyhow` with context on top of them.

use thiserror::Error;

/// A single remote text fetch failed
#[derive(Error, Debug)]
pub enum FetchError {
    /// The request did not complete within the fetch timeout
    #[error("Request to {url} timed out after {seconds}s")]
    Timeout { url: String, seconds: u64 },

    /// The server answered with a status other than 2xx or 304
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// The server returned an HTML page instead of raw text
    #[error(
        "{url} returned an HTML page ({content_type}).\n\
         The URL most likely points at a web page rather than a raw llms.txt file."
    )]
    HtmlContent { url: String, content_type: String },

    /// The declared or actual body exceeds the size cap
    #[error("Response from {url} is too large ({size} bytes, limit is {limit} bytes)")]
    TooLarge { url: String, size: u64, limit: u64 },

    /// The body is not valid UTF-8 text
    #[error("Response from {url} is not valid UTF-8 text")]
    InvalidUtf8 { url: String },

    /// Connection, TLS or protocol failure below HTTP
    #[error("Failed to fetch {url}: {message}")]
    Transport { url: String, message: String },
}

impl FetchError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Loading the registry catalog failed and no usable cache was available
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The registry endpoint could not be fetched
    #[error("Could not load the skills registry")]
    Fetch(#[from] FetchError),

    /// The registry document is not a JSON array of entries
    #[error("The skills registry returned a malformed document: {reason}")]
    Malformed { reason: String },
}
