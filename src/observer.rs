//! Observer
//!
//! Runs one collection cycle per scrape:
//!
//! 1. reuse the cached session if it is still connected, otherwise open a new one
//! 2. round one: request every watcher's info keys
//! 3. round two: request the identity keys plus every watcher's detail keys
//! 4. run the watchers in order over the round-two answer
//! 5. report `aerospike_node_up`, labelled with the last known node identity
//!
//! The scrape counter is bumped at cycle entry, whatever the outcome.

use prometheus::{IntCounter, Opts};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::error::ObserveError;
use crate::info::request_info;
use crate::metrics::{Emission, MetricSink, SinkError};
use crate::session::{ConnectionError, RawMetrics, Session, SessionProvider};
use crate::watcher::{Accumulator, IDENTITY_KEYS, Watcher, default_watchers};

/// Name of the liveness gauge.
pub const NODE_UP: &str = "aerospike_node_up";

/// Name of the scrape counter.
pub const NODE_TICKS: &str = "aerospike_node_ticks";

/// Identity of the observed node, as of the last successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeIdentity {
    pub cluster_name: String,
    pub service: String,
    pub build: String,
}

impl NodeIdentity {
    fn from_raw(raw: &RawMetrics) -> Self {
        let get = |key: &str| raw.get(key).cloned().unwrap_or_default();
        Self {
            cluster_name: get("cluster-name"),
            service: get("service"),
            build: get("build"),
        }
    }
}

/// Step of the cycle that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    AcquiringSession,
    RoundOneFetch,
    RoundTwoFetch,
    WatcherPass,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AcquiringSession => write!(f, "acquiring session"),
            Self::RoundOneFetch => write!(f, "round one fetch"),
            Self::RoundTwoFetch => write!(f, "round two fetch"),
            Self::WatcherPass => write!(f, "watcher pass"),
        }
    }
}

/// A failed cycle, with whatever raw data was fetched before the failure.
#[derive(Debug, Error)]
#[error("{phase} failed: {error}")]
pub struct RefreshFailure {
    pub phase: CyclePhase,
    #[source]
    pub error: ObserveError,
    /// Round-one answer for a round-two failure, round-two answer for a watcher failure.
    pub raw: Option<RawMetrics>,
    /// Watcher that failed, for watcher-pass failures.
    pub watcher: Option<&'static str>,
}

impl RefreshFailure {
    fn new(phase: CyclePhase, error: impl Into<ObserveError>, raw: Option<RawMetrics>) -> Self {
        Self {
            phase,
            error: error.into(),
            raw,
            watcher: None,
        }
    }
}

/// Anything the HTTP layer can scrape.
#[async_trait::async_trait]
pub trait Scrape: Send + Sync + 'static {
    /// Run one cycle and return its samples.
    async fn scrape(&self) -> MetricSink;
}

struct CycleState<S> {
    session: Option<S>,
    identity: NodeIdentity,
}

/// Collects metrics from one node.
///
/// The mutex serialises cycles: only one cycle at a time ever touches the
/// session or the cached identity.
pub struct Observer<P: SessionProvider> {
    provider: P,
    watchers: Vec<Box<dyn Watcher>>,
    ticks: IntCounter,
    state: Mutex<CycleState<P::Session>>,
}

impl<P: SessionProvider> Observer<P> {
    /// Create an observer running the default watchers.
    pub fn new(provider: P) -> Result<Self, SinkError> {
        Self::with_watchers(provider, default_watchers())
    }

    /// Create an observer running `watchers`, in the given order.
    pub fn with_watchers(provider: P, watchers: Vec<Box<dyn Watcher>>) -> Result<Self, SinkError> {
        let ticks = IntCounter::with_opts(Opts::new(
            NODE_TICKS,
            "Number of times the exporter has been scraped",
        ))?;

        tracing::debug!(
            watchers = ?watchers.iter().map(|w| w.name()).collect::<Vec<_>>(),
            "Observer created"
        );

        Ok(Self {
            provider,
            watchers,
            ticks,
            state: Mutex::new(CycleState {
                session: None,
                identity: NodeIdentity::default(),
            }),
        })
    }

    /// Get the session provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Number of cycles started so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.get()
    }

    /// Identity cached by the last successful cycle.
    pub async fn identity(&self) -> NodeIdentity {
        self.state.lock().await.identity.clone()
    }

    /// Run one cycle and return its samples.
    ///
    /// Never fails: a failed cycle is logged and reported as `aerospike_node_up 0`.
    pub async fn collect(&self) -> MetricSink {
        self.ticks.inc();

        let mut sink = MetricSink::new();
        if let Err(e) = sink.register(Box::new(self.ticks.clone())) {
            tracing::warn!(error = %e, "Failed to register scrape counter");
        }

        let mut state = self.state.lock().await;

        let up = match self.refresh(&mut state.session, &mut sink).await {
            Ok(identity) => {
                state.identity = identity;
                1.0
            }
            Err(failure) => {
                tracing::warn!(
                    phase = %failure.phase,
                    watcher = failure.watcher.unwrap_or("-"),
                    error = %failure.error,
                    "Failed to refresh node metrics"
                );
                if let Some(raw) = &failure.raw {
                    let mut keys: Vec<&str> = raw.keys().map(String::as_str).collect();
                    keys.sort_unstable();
                    tracing::debug!(?keys, "Raw response available for the failed cycle");
                }
                0.0
            }
        };

        let identity = &state.identity;
        let gauge = Emission::gauge(NODE_UP, up)
            .with_help("Whether node is active")
            .with_label("cluster_name", &identity.cluster_name)
            .with_label("service", &identity.service)
            .with_label("build", &identity.build);

        if let Err(e) = sink.emit(gauge) {
            tracing::warn!(error = %e, "Failed to report node liveness");
        }

        sink
    }

    async fn refresh(
        &self,
        slot: &mut Option<P::Session>,
        sink: &mut MetricSink,
    ) -> Result<NodeIdentity, RefreshFailure> {
        let session = self
            .acquire(slot)
            .await
            .map_err(|e| RefreshFailure::new(CyclePhase::AcquiringSession, e, None))?;

        let info_keys: Vec<String> = self.watchers.iter().flat_map(|w| w.info_keys()).collect();
        let round_one = if info_keys.is_empty() {
            RawMetrics::new()
        } else {
            request_info(session, &info_keys)
                .await
                .map_err(|e| RefreshFailure::new(CyclePhase::RoundOneFetch, e, None))?
        };

        let mut keys: Vec<String> = IDENTITY_KEYS.iter().map(|k| k.to_string()).collect();
        let mut watcher_keys = Vec::with_capacity(self.watchers.len());
        for watcher in &self.watchers {
            let detail = watcher.detail_keys(&round_one);
            keys.extend(detail.iter().cloned());
            watcher_keys.push(detail);
        }

        let round_two = match request_info(session, &keys).await {
            Ok(raw) => raw,
            Err(e) => {
                return Err(RefreshFailure::new(
                    CyclePhase::RoundTwoFetch,
                    e,
                    Some(round_one),
                ));
            }
        };

        let mut accumulator = Accumulator::new();
        for (watcher, my_keys) in self.watchers.iter().zip(&watcher_keys) {
            if let Err(e) = watcher.refresh(my_keys, &round_two, &mut accumulator, sink) {
                return Err(RefreshFailure {
                    watcher: Some(watcher.name()),
                    ..RefreshFailure::new(CyclePhase::WatcherPass, e, Some(round_two))
                });
            }
        }

        Ok(NodeIdentity::from_raw(&round_two))
    }

    /// Reuse the cached session if it is still connected, otherwise open a new one.
    async fn acquire<'s>(
        &self,
        slot: &'s mut Option<P::Session>,
    ) -> Result<&'s mut P::Session, ConnectionError> {
        let session = match slot.take() {
            Some(session) if session.is_connected() => session,
            stale => {
                if stale.is_some() {
                    tracing::debug!("Discarding session that is no longer connected");
                }
                // Release the connection slot before opening a new one.
                drop(stale);
                self.provider.connect().await?
            }
        };
        Ok(slot.insert(session))
    }
}

#[async_trait::async_trait]
impl<P: SessionProvider> Scrape for Observer<P> {
    async fn scrape(&self) -> MetricSink {
        self.collect().await
    }
}

impl<P: SessionProvider> std::fmt::Debug for Observer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field(
                "watchers",
                &self.watchers.iter().map(|w| w.name()).collect::<Vec<_>>(),
            )
            .field("ticks", &self.ticks.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    fn raw(pairs: &[(&str, &str)]) -> RawMetrics {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Answers requests from a fixed script, one reply per request.
    struct ScriptedSession(VecDeque<RawMetrics>);

    #[async_trait::async_trait]
    impl Session for ScriptedSession {
        fn is_connected(&self) -> bool {
            true
        }

        async fn request_info(&mut self, _keys: &[String]) -> Result<RawMetrics, ConnectionError> {
            self.0.pop_front().ok_or(ConnectionError::Closed)
        }
    }

    struct ScriptedNode(StdMutex<Option<Vec<RawMetrics>>>);

    impl ScriptedNode {
        fn new(replies: Vec<RawMetrics>) -> Self {
            Self(StdMutex::new(Some(replies)))
        }
    }

    #[async_trait::async_trait]
    impl SessionProvider for ScriptedNode {
        type Session = ScriptedSession;

        async fn connect(&self) -> Result<ScriptedSession, ConnectionError> {
            let replies = self.0.lock().unwrap().take().ok_or(ConnectionError::Closed)?;
            Ok(ScriptedSession(replies.into()))
        }
    }

    #[test]
    fn test_identity_from_round_two() {
        let raw: RawMetrics = [
            ("cluster-name", "prod"),
            ("service", "10.0.0.1:3000"),
            ("build", "7.0.0.1"),
            ("statistics", "uptime=1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let identity = NodeIdentity::from_raw(&raw);
        assert_eq!(identity.cluster_name, "prod");
        assert_eq!(identity.service, "10.0.0.1:3000");
        assert_eq!(identity.build, "7.0.0.1");
    }

    #[test]
    fn test_failure_display() {
        let failure = RefreshFailure::new(
            CyclePhase::RoundOneFetch,
            ObserveError::Protocol("ERROR:Invalid command".to_string()),
            None,
        );
        assert_eq!(
            failure.to_string(),
            "round one fetch failed: ERROR:Invalid command"
        );
    }

    #[tokio::test]
    async fn test_round_two_failure_carries_round_one_answer() {
        let round_one = raw(&[("namespaces", "test;bar")]);
        let node = ScriptedNode::new(vec![round_one.clone(), raw(&[("ERROR::busy", "")])]);
        let observer = Observer::new(node).unwrap();

        let mut slot = None;
        let mut sink = MetricSink::new();
        let failure = observer.refresh(&mut slot, &mut sink).await.unwrap_err();

        assert_eq!(failure.phase, CyclePhase::RoundTwoFetch);
        assert!(matches!(failure.error, ObserveError::Protocol(ref key) if key == "ERROR::busy"));
        assert_eq!(failure.raw, Some(round_one));
        assert!(failure.watcher.is_none());
        assert!(sink.samples().is_empty());
        // The session stays cached for the next cycle.
        assert!(slot.is_some());
    }

    #[tokio::test]
    async fn test_watcher_failure_carries_round_two_answer() {
        let round_two = raw(&[
            ("cluster-name", "prod"),
            ("service", "10.0.0.1:3000"),
            ("build", "7.0.0.1"),
            ("namespace/test", "objects=1;broken"),
        ]);
        let node = ScriptedNode::new(vec![raw(&[("namespaces", "test")]), round_two.clone()]);
        let observer = Observer::new(node).unwrap();

        let mut slot = None;
        let failure = observer
            .refresh(&mut slot, &mut MetricSink::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, CyclePhase::WatcherPass);
        assert_eq!(failure.watcher, Some("namespace"));
        assert_eq!(failure.raw, Some(round_two));
    }
}
