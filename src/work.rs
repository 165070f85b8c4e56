//! Multi-source proof-of-work.
//!
//! Every configured source races for the same hash: each peer work server, the
//! delegated service when a key is available, and local generation when no
//! remote source is configured or the peers have recently failed. The first
//! valid result wins and the rest are cancelled. When nothing usable arrives
//! before the deadline the engine falls back to local generation once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::client::{DelegatedWorkClient, WorkPeerClient};
use crate::config::WorkConfig;
use crate::encoding::parse_block_hash;
use crate::error::{Result, WalletError};
use crate::pow::{self, difficulty_string, is_work_valid_for_threshold, threshold_from_multiplier};

#[derive(Debug, Clone)]
pub struct WorkRequest {
    /// Block hash or, for an account's first block, its public key (hex).
    pub hash: String,
    pub multiplier: u64,
    pub validate: bool,
    /// Overrides the configured delegated key for this request.
    pub delegated_key: Option<String>,
    pub block_award: bool,
}

impl WorkRequest {
    pub fn new(hash: impl Into<String>, multiplier: u64) -> Self {
        WorkRequest {
            hash: hash.into(),
            multiplier,
            validate: true,
            delegated_key: None,
            block_award: true,
        }
    }

    pub fn with_delegated_key(mut self, key: Option<String>) -> Self {
        self.delegated_key = key;
        self
    }
}

/// Anything that can produce work for a block.
#[async_trait]
pub trait WorkProvider: Send + Sync {
    async fn work_generate(&self, request: &WorkRequest) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WorkSource {
    Local,
    Peer(String),
    Delegated,
}

impl WorkSource {
    fn is_remote(&self) -> bool {
        !matches!(self, WorkSource::Local)
    }
}

struct Job {
    previous: [u8; 32],
    hash: String,
    threshold: u64,
    multiplier: u64,
    validate: bool,
    delegated_key: Option<String>,
    block_award: bool,
}

pub struct WorkEngine {
    peers: Vec<String>,
    peer_client: WorkPeerClient,
    delegated: DelegatedWorkClient,
    delegated_key: Option<String>,
    timeout: Duration,
    threads: usize,
    peers_failing: AtomicBool,
}

impl WorkEngine {
    pub fn new(config: &WorkConfig) -> Self {
        let timeout = config.timeout();
        WorkEngine {
            peers: config.peers.clone(),
            peer_client: WorkPeerClient::new(timeout),
            delegated: DelegatedWorkClient::new(config.delegated_url.clone(), timeout),
            delegated_key: config.delegated_key.clone().filter(|k| !k.is_empty()),
            timeout,
            threads: config.threads(),
            peers_failing: AtomicBool::new(false),
        }
    }

    pub fn peers_failing(&self) -> bool {
        self.peers_failing.load(Ordering::SeqCst)
    }

    pub async fn generate(&self, request: &WorkRequest) -> Result<String> {
        let previous = parse_block_hash(&request.hash)?;
        let threshold = threshold_from_multiplier(request.multiplier);
        self.run(Job {
            previous,
            hash: hex::encode_upper(previous),
            threshold,
            multiplier: request.multiplier.max(1),
            validate: request.validate,
            delegated_key: request
                .delegated_key
                .clone()
                .filter(|k| !k.is_empty())
                .or_else(|| self.delegated_key.clone()),
            block_award: request.block_award,
        })
        .await
    }

    async fn run(&self, job: Job) -> Result<String> {
        let run_local = (self.peers.is_empty() && job.delegated_key.is_none()) || self.peers_failing();
        let difficulty = difficulty_string(job.threshold);
        let racer_count = self.peers.len() + usize::from(job.delegated_key.is_some()) + usize::from(run_local);

        let (tx, mut rx) = mpsc::channel::<(WorkSource, String)>(racer_count.max(1));
        let cancel = Arc::new(AtomicBool::new(false));
        let mut racers = JoinSet::new();

        for peer in &self.peers {
            let tx = tx.clone();
            let client = self.peer_client.clone();
            let url = peer.clone();
            let hash = job.hash.clone();
            let difficulty = difficulty.clone();
            let (previous, threshold, validate) = (job.previous, job.threshold, job.validate);
            racers.spawn(async move {
                match client.work_generate(&url, &hash, &difficulty).await {
                    Ok(work) if !validate || is_work_valid_for_threshold(&previous, threshold, &work) => {
                        let _ = tx.send((WorkSource::Peer(url), work)).await;
                    }
                    Ok(work) => warn!("Invalid work {} for {} from {}", work, hash, url),
                    Err(e) => debug!("Work peer {} failed: {}", url, e),
                }
            });
        }

        if let Some(key) = job.delegated_key.clone() {
            let tx = tx.clone();
            let client = self.delegated.clone();
            let hash = job.hash.clone();
            let (previous, threshold, validate) = (job.previous, job.threshold, job.validate);
            let (multiplier, block_award) = (job.multiplier, job.block_award);
            racers.spawn(async move {
                match client.work_generate(&key, &hash, multiplier, block_award).await {
                    Ok(work) if !validate || is_work_valid_for_threshold(&previous, threshold, &work) => {
                        let _ = tx.send((WorkSource::Delegated, work)).await;
                    }
                    Ok(work) => warn!("Invalid work {} for {} from delegated service", work, hash),
                    Err(e) => debug!("Delegated work failed: {}", e),
                }
            });
        }

        if run_local {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let (previous, threshold, threads) = (job.previous, job.threshold, self.threads);
            racers.spawn(async move {
                let found = tokio::task::spawn_blocking(move || pow::generate(&previous, threshold, threads, &cancel)).await;
                if let Ok(Some(work)) = found {
                    let _ = tx.send((WorkSource::Local, work)).await;
                }
            });
        }

        // racers hold the only senders, so recv yields None once they all abstain
        drop(tx);
        let outcome = tokio::time::timeout(self.timeout, rx.recv()).await;

        rx.close();
        cancel.store(true, Ordering::SeqCst);
        racers.abort_all();
        while racers.join_next().await.is_some() {}
        self.cancel_peers(&job.hash);

        match outcome {
            Ok(Some((source, work))) => {
                if source.is_remote() {
                    self.peers_failing.store(false, Ordering::SeqCst);
                }
                info!("Work {} for {} from {:?}", work, job.hash, source);
                Ok(work)
            }
            Ok(None) | Err(_) if run_local => {
                warn!("Unable to generate work for {}", job.hash);
                Err(WalletError::WorkGenerationFailed)
            }
            Ok(None) | Err(_) => {
                warn!("No remote work for {}, falling back to local generation", job.hash);
                self.peers_failing.store(true, Ordering::SeqCst);
                let (previous, threshold, threads) = (job.previous, job.threshold, self.threads);
                let never = AtomicBool::new(false);
                tokio::task::spawn_blocking(move || pow::generate(&previous, threshold, threads, &never))
                    .await
                    .map_err(|e| WalletError::Internal(format!("local work task: {}", e)))?
                    .ok_or(WalletError::WorkGenerationFailed)
            }
        }
    }

    fn cancel_peers(&self, hash: &str) {
        for peer in &self.peers {
            let client = self.peer_client.clone();
            let url = peer.clone();
            let hash = hash.to_string();
            tokio::spawn(async move { client.work_cancel(&url, &hash).await });
        }
    }
}

#[async_trait]
impl WorkProvider for WorkEngine {
    async fn work_generate(&self, request: &WorkRequest) -> Result<String> {
        self.generate(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;

    const HASH: &str = "3F93C5CD2E314FA16702189041E68E68C07B27961BF37F0B7705145BEFBA3AA3";
    const GOOD_WORK: &str = "205452237a9b01f4";
    const EASY: u64 = 0xff00000000000000;

    #[derive(Clone)]
    struct Peer {
        work: &'static str,
        delay: Duration,
        cancels: Arc<AtomicUsize>,
    }

    async fn peer_handler(State(peer): State<Peer>, Json(req): Json<Value>) -> Json<Value> {
        if req["action"] == "work_cancel" {
            peer.cancels.fetch_add(1, Ordering::SeqCst);
            return Json(json!({}));
        }
        tokio::time::sleep(peer.delay).await;
        Json(json!({ "work": peer.work }))
    }

    async fn spawn_peer(work: &'static str, delay: Duration) -> (String, Arc<AtomicUsize>) {
        let cancels = Arc::new(AtomicUsize::new(0));
        let state = Peer {
            work,
            delay,
            cancels: cancels.clone(),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = Router::new().route("/", post(peer_handler)).with_state(state);
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), cancels)
    }

    fn engine(peers: Vec<String>) -> WorkEngine {
        WorkEngine::new(&WorkConfig {
            peers,
            timeout_secs: 1,
            local_threads: 2,
            ..WorkConfig::default()
        })
    }

    fn easy_job(validate: bool) -> Job {
        let previous = crate::encoding::parse_hex32(HASH).unwrap();
        Job {
            previous,
            hash: HASH.to_string(),
            threshold: EASY,
            multiplier: 1,
            validate,
            delegated_key: None,
            block_award: true,
        }
    }

    #[tokio::test]
    async fn test_local_only() {
        let engine = engine(vec![]);
        let work = engine.run(easy_job(true)).await.unwrap();
        let previous = crate::encoding::parse_hex32(HASH).unwrap();
        assert!(is_work_valid_for_threshold(&previous, EASY, &work));
    }

    #[tokio::test]
    async fn test_peer_wins_and_is_cancelled() {
        let (url, cancels) = spawn_peer(GOOD_WORK, Duration::ZERO).await;
        let engine = engine(vec![url]);
        let work = engine.generate(&WorkRequest::new(HASH, 64)).await.unwrap();
        assert_eq!(work, GOOD_WORK);
        assert!(!engine.peers_failing());

        for _ in 0..100 {
            if cancels.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_peer_work_falls_back_and_marks_failing() {
        let (url, _) = spawn_peer("0000000000000000", Duration::ZERO).await;
        let engine = engine(vec![url]);
        let work = engine.run(easy_job(true)).await.unwrap();
        assert_ne!(work, "0000000000000000");
        assert!(engine.peers_failing());

        // local now races alongside the peer; a remote win clears the flag
        let (good, _) = spawn_peer(GOOD_WORK, Duration::ZERO).await;
        let mixed = WorkEngine {
            peers: vec![good],
            ..engine
        };
        let work = mixed.generate(&WorkRequest::new(HASH, 1)).await.unwrap();
        assert_eq!(work, GOOD_WORK);
        assert!(!mixed.peers_failing());
    }

    #[tokio::test]
    async fn test_unvalidated_peer_work_is_accepted() {
        let (url, _) = spawn_peer("0000000000000000", Duration::ZERO).await;
        let engine = engine(vec![url]);
        assert_eq!(engine.run(easy_job(false)).await.unwrap(), "0000000000000000");
    }

    #[tokio::test]
    async fn test_slow_peer_times_out_to_local() {
        let (url, _) = spawn_peer(GOOD_WORK, Duration::from_secs(5)).await;
        let engine = engine(vec![url]);
        let started = std::time::Instant::now();
        let work = engine.run(easy_job(true)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(4));
        let previous = crate::encoding::parse_hex32(HASH).unwrap();
        assert!(is_work_valid_for_threshold(&previous, EASY, &work));
        assert!(engine.peers_failing());
    }

    #[tokio::test]
    async fn test_delegated_source() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = Router::new().route(
                "/",
                post(|Json(_): Json<Value>| async { Json(json!({"data": {"workGenerate": GOOD_WORK}})) }),
            );
            axum::serve(listener, app).await.unwrap();
        });

        let engine = WorkEngine::new(&WorkConfig {
            delegated_url: format!("http://{}", addr),
            timeout_secs: 1,
            ..WorkConfig::default()
        });
        let request = WorkRequest::new(HASH, 64).with_delegated_key(Some("key".to_string()));
        assert_eq!(engine.generate(&request).await.unwrap(), GOOD_WORK);
    }

    #[tokio::test]
    async fn test_rejects_bad_hash() {
        let engine = engine(vec![]);
        assert!(matches!(
            engine.generate(&WorkRequest::new("xyz", 1)).await,
            Err(WalletError::InvalidHash(_))
        ));
    }
}
