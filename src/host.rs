// # Host seams
//
// The sequencer does not talk to the network itself. The hosting client provides
// search dispatch, transfer enqueueing and a status display through these traits.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors reported by the hosting client
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HostError {
    #[error("Search rejected: {0}")]
    SearchRejected(String),
    #[error("Transfer rejected: {0}")]
    TransferRejected(String),
    #[error("Host unavailable: {0}")]
    Unavailable(String),
}

/// Where a search is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchScope {
    Global,
    Buddies,
    Rooms,
    User(String),
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchScope::Global => write!(f, "global"),
            SearchScope::Buddies => write!(f, "buddies"),
            SearchScope::Rooms => write!(f, "rooms"),
            SearchScope::User(name) => write!(f, "user:{}", name),
        }
    }
}

impl FromStr for SearchScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "global" => Ok(SearchScope::Global),
            "buddies" => Ok(SearchScope::Buddies),
            "rooms" => Ok(SearchScope::Rooms),
            _ => match s.split_once(':') {
                Some((prefix, name)) if prefix.eq_ignore_ascii_case("user") && !name.is_empty() => {
                    Ok(SearchScope::User(name.to_string()))
                }
                _ => Err(format!("Unknown search scope: {}", s)),
            },
        }
    }
}

/// Identifies one dispatched search; result batches carry the token they answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SearchToken(pub u32);

/// One result batch from a single peer
///
/// Records stay loosely typed until the matcher destructures them:
/// `[code, remote_path, size, extension, attributes, ...]`.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub token: SearchToken,
    pub peer: String,
    pub results: Vec<Value>,
}

/// Network search subsystem of the host
pub trait SearchService: Send + Sync {
    /// Issue a search. Results arrive later through the event bus.
    fn search(&self, term: &str, scope: &SearchScope) -> Result<SearchToken, HostError>;
}

/// Transfer subsystem of the host
pub trait TransferService: Send + Sync {
    /// Enqueue a download of `remote_path` from `peer`. Fire-and-forget.
    fn enqueue_download(&self, peer: &str, remote_path: &str) -> Result<(), HostError>;
}

/// Presentation sink for status text
pub trait StatusSink: Send + Sync {
    /// Replace the status area (validation warning or final summary)
    fn set_status(&self, message: &str);

    /// Running log line for a notable event
    fn log_line(&self, _line: &str) {}
}

/// Sink that discards everything; used when nobody is watching
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn set_status(&self, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scope() {
        assert_eq!("Global".parse::<SearchScope>().unwrap(), SearchScope::Global);
        assert_eq!(" rooms ".parse::<SearchScope>().unwrap(), SearchScope::Rooms);
        assert_eq!(
            "user:Alice".parse::<SearchScope>().unwrap(),
            SearchScope::User("Alice".to_string())
        );
        assert!("user:".parse::<SearchScope>().is_err());
        assert!("everywhere".parse::<SearchScope>().is_err());
    }

    #[test]
    fn test_scope_display_round_trips_user() {
        let scope = SearchScope::User("bob".to_string());
        assert_eq!(scope.to_string().parse::<SearchScope>().unwrap(), scope);
    }
}
