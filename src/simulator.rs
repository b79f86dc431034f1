// # Simulated host
//
// In-process stand-in for the peer network, driven by a JSON catalog of peers and
// the files they share. Used by the command-line tool and integration tests.

use crate::events::SearchEvents;
use crate::host::{HostError, SearchResponse, SearchScope, SearchService, SearchToken, TransferService};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid catalog: {0}")]
    Json(#[from] serde_json::Error),
}

/// A file shared by a simulated peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedFile {
    /// Backslash-separated path as the peer reports it
    pub path: String,
    pub size: u64,
    /// Attribute slot exactly as it goes on the wire
    #[serde(default)]
    pub attributes: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogPeer {
    pub name: String,
    #[serde(default)]
    pub files: Vec<SharedFile>,
}

/// Everything the simulated network knows about
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub peers: Vec<CatalogPeer>,
    /// Searches for these terms are rejected at dispatch
    #[serde(default)]
    pub fail_terms: Vec<String>,
}

impl Catalog {
    pub async fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Per-peer hits: files whose path has every word of `term`
    pub fn lookup(&self, term: &str) -> Vec<(String, Vec<&SharedFile>)> {
        let words = words_of(term);
        if words.is_empty() {
            return Vec::new();
        }

        self.peers
            .iter()
            .filter_map(|peer| {
                let hits: Vec<&SharedFile> = peer
                    .files
                    .iter()
                    .filter(|file| words.is_subset(&words_of(&file.path)))
                    .collect();
                (!hits.is_empty()).then(|| (peer.name.clone(), hits))
            })
            .collect()
    }
}

/// Lowercased alphanumeric words
fn words_of(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Wire record for a shared file: `[code, path, size, extension, attributes]`
fn to_record(file: &SharedFile) -> Value {
    let extension = file
        .path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_string())
        .unwrap_or_default();
    json!([1, file.path, file.size, extension, file.attributes])
}

/// Simulated network implementing both host services
pub struct SimulatedNetwork {
    catalog: Arc<Catalog>,
    events: SearchEvents,
    latency: Duration,
    next_token: AtomicU32,
    downloads: Mutex<Vec<(String, String)>>,
}

impl SimulatedNetwork {
    /// Peers answer each search after `latency`
    pub fn new(catalog: Catalog, events: SearchEvents, latency: Duration) -> Self {
        SimulatedNetwork {
            catalog: Arc::new(catalog),
            events,
            latency,
            next_token: AtomicU32::new(0),
            downloads: Mutex::new(Vec::new()),
        }
    }

    /// `(peer, remote_path)` pairs enqueued so far
    pub fn downloads(&self) -> Vec<(String, String)> {
        self.downloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SearchService for SimulatedNetwork {
    fn search(&self, term: &str, scope: &SearchScope) -> Result<SearchToken, HostError> {
        if self
            .catalog
            .fail_terms
            .iter()
            .any(|t| t.eq_ignore_ascii_case(term))
        {
            return Err(HostError::SearchRejected(format!(
                "server refused search for {}",
                term
            )));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HostError::Unavailable(e.to_string()))?;

        let token = SearchToken(self.next_token.fetch_add(1, Ordering::SeqCst) + 1);
        let responses: Vec<SearchResponse> = self
            .catalog
            .lookup(term)
            .into_iter()
            .map(|(peer, hits)| SearchResponse {
                token,
                peer,
                results: hits.into_iter().map(to_record).collect(),
            })
            .collect();
        debug!(
            "Simulator: {} search for {:?} -> {} peer(s) with hits",
            scope,
            term,
            responses.len()
        );

        let events = self.events.clone();
        let latency = self.latency;
        runtime.spawn(async move {
            tokio::time::sleep(latency).await;
            for response in responses {
                events.publish(response);
            }
        });

        Ok(token)
    }
}

impl TransferService for SimulatedNetwork {
    fn enqueue_download(&self, peer: &str, remote_path: &str) -> Result<(), HostError> {
        if !self.catalog.peers.iter().any(|p| p.name == peer) {
            return Err(HostError::TransferRejected(format!("unknown peer {}", peer)));
        }
        info!("Simulator: queued {} from {}", remote_path, peer);
        self.downloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((peer.to_string(), remote_path.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        serde_json::from_value(json!({
            "peers": [
                {
                    "name": "alice",
                    "files": [
                        {"path": "Music\\Artist\\Song A.mp3", "size": 8000000, "attributes": {"0": 320}},
                        {"path": "Music\\Artist\\Song B.flac", "size": 30000000}
                    ]
                },
                {"name": "bob", "files": [{"path": "b\\song a (live).mp3", "size": 1}]},
                {"name": "carol"}
            ],
            "fail_terms": ["broken"]
        }))
        .unwrap()
    }

    #[test]
    fn test_lookup_matches_all_words() {
        let catalog = catalog();
        let hits = catalog.lookup("song a");
        let peers: Vec<&str> = hits.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(peers, vec!["alice", "bob"]);

        assert!(catalog.lookup("song zebra").is_empty());
        assert!(catalog.lookup("   ").is_empty());
    }

    #[test]
    fn test_record_shape() {
        let catalog = catalog();
        let record = to_record(&catalog.peers[0].files[0]);
        assert_eq!(
            record,
            json!([1, "Music\\Artist\\Song A.mp3", 8000000, "mp3", {"0": 320}])
        );
        let record = to_record(&catalog.peers[0].files[1]);
        assert_eq!(record[4], Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_publishes_after_latency() {
        let events = SearchEvents::new();
        let mut sub = events.subscribe();
        let network = SimulatedNetwork::new(catalog(), events.clone(), Duration::from_millis(500));

        let token = network.search("Song A", &SearchScope::Global).unwrap();
        assert!(sub.rx.try_recv().is_err());

        let first = sub.rx.recv().await.unwrap();
        let second = sub.rx.recv().await.unwrap();
        assert_eq!(first.token, token);
        assert_eq!(first.peer, "alice");
        assert_eq!(second.peer, "bob");
    }

    #[test]
    fn test_rejected_search() {
        let network = SimulatedNetwork::new(catalog(), SearchEvents::new(), Duration::ZERO);
        assert!(matches!(
            network.search("Broken", &SearchScope::Global),
            Err(HostError::SearchRejected(_))
        ));
    }

    #[test]
    fn test_search_outside_runtime_is_unavailable() {
        let network = SimulatedNetwork::new(catalog(), SearchEvents::new(), Duration::ZERO);
        assert!(matches!(
            network.search("song", &SearchScope::Global),
            Err(HostError::Unavailable(_))
        ));
    }

    #[test]
    fn test_enqueue_download() {
        let network = SimulatedNetwork::new(catalog(), SearchEvents::new(), Duration::ZERO);
        network.enqueue_download("alice", "Music\\Artist\\Song A.mp3").unwrap();
        assert!(network.enqueue_download("mallory", "x").is_err());
        assert_eq!(network.downloads().len(), 1);
    }
}
