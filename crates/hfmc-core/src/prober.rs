//! The peer liveness prober: a cooperative, heap-driven scheduler that
//! probes many peers on a steady cadence and publishes an "alive set"
//! consumed concurrently by request handlers. A min-heap keyed by
//! last-probed epoch dispatches one probe per tick; results are applied
//! on completion.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::api_settings::PROBE_INTERVAL;
use crate::peer::Peer;

/// The probe primitive the prober dispatches. Defined as a callback
/// rather than calling the HTTP client layer directly, which would
/// create a cyclic dependency between the client and the prober
/// (avoids a cyclic dependency between the client and the prober).
pub type ProbeFn = Arc<dyn Fn(Peer) -> BoxFuture<'static, Peer> + Send + Sync>;

/// Heap entry: ordered by `(epoch, ip, port)` so that the least-recently
/// probed peer pops first, with identity as a stable tie-break within an
/// epoch.
#[derive(Clone)]
struct ProbeKey(Peer);

impl PartialEq for ProbeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for ProbeKey {}

impl PartialOrd for ProbeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProbeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .epoch
            .cmp(&other.0.epoch)
            .then_with(|| self.0.ip.cmp(&other.0.ip))
            .then_with(|| self.0.port.cmp(&other.0.port))
    }
}

struct ProberState {
    peers: Vec<Peer>,
    updates: Option<HashSet<Peer>>,
    actives: HashSet<Peer>,
    heap: BinaryHeap<Reverse<ProbeKey>>,
}

impl ProberState {
    fn new(peers: Vec<Peer>) -> Self {
        let mut s = Self {
            peers,
            updates: None,
            actives: HashSet::new(),
            heap: BinaryHeap::new(),
        };
        s.reset_heap();
        s
    }

    fn reset_heap(&mut self) {
        self.heap = self
            .peers
            .iter()
            .cloned()
            .map(|p| Reverse(ProbeKey(p)))
            .collect();
    }

    fn apply_staged_update(&mut self) {
        if let Some(updates) = self.updates.take() {
            let removed: HashSet<Peer> = self
                .peers
                .iter()
                .filter(|p| !updates.contains(p))
                .cloned()
                .collect();
            for p in &removed {
                self.actives.remove(p);
            }
            self.peers = updates.into_iter().collect();
            self.reset_heap();
        }
    }
}

/// Lifecycle state machine: `{Idle, Running, Stopping}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProberStatus {
    Idle,
    Running,
    Stopping,
}

pub struct PeerProber {
    state: Arc<Mutex<ProberState>>,
    probe_fn: ProbeFn,
    running: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl PeerProber {
    pub fn new(peers: Vec<Peer>, probe_fn: ProbeFn) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProberState::new(peers))),
            probe_fn,
            running: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
        }
    }

    /// Consistent snapshot of the alive set. Never blocks on an in-flight
    /// probe.
    pub async fn alives(&self) -> Vec<Peer> {
        self.state.lock().await.actives.iter().cloned().collect()
    }

    pub fn status(&self) -> ProberStatus {
        if self.running.load(AtomicOrdering::SeqCst) {
            ProberStatus::Running
        } else {
            ProberStatus::Idle
        }
    }

    /// Stage a complete replacement for the peer set. Takes effect at the
    /// next scheduler tick.
    pub async fn update_peers(&self, new_registry: Vec<Peer>) {
        self.state.lock().await.updates = Some(new_registry.into_iter().collect());
    }

    /// Start the tick loop. Idempotent: calling `start` while already
    /// running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_err()
        {
            return;
        }

        let token = CancellationToken::new();
        let this = Arc::clone(self);
        let loop_token = token.clone();
        tokio::spawn(async move {
            this.tick_loop(loop_token).await;
        });

        // This briefly blocks on the prober's own mutex (not a probe), so
        // a synchronous setter is fine here; start() is not called from
        // hot paths.
        if let Ok(mut guard) = self.cancel.try_lock() {
            *guard = Some(token);
        }
    }

    async fn tick_loop(self: Arc<Self>, cancel: CancellationToken) {
        {
            let state = self.state.lock().await;
            if state.heap.is_empty() {
                debug!("no peers configured to probe");
            }
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.running.store(false, AtomicOrdering::SeqCst);
                    return;
                }
                _ = tokio::time::sleep(PROBE_INTERVAL) => {}
            }

            if !self.running.load(AtomicOrdering::SeqCst) {
                return;
            }

            let popped = {
                let mut state = self.state.lock().await;
                state.apply_staged_update();
                state.heap.pop().map(|Reverse(k)| k.0)
            };

            let Some(peer) = popped else { continue };

            let probe_fn = Arc::clone(&self.probe_fn);
            let state = Arc::clone(&self.state);
            let running = Arc::clone(&self.running);
            tokio::spawn(async move {
                let probed = probe_fn(peer).await;
                if !running.load(AtomicOrdering::SeqCst) {
                    // Stopping: discard the result.
                    return;
                }
                let mut state = state.lock().await;
                if state.peers.contains(&probed) {
                    if probed.alive {
                        state.actives.insert(probed.clone());
                    } else {
                        state.actives.remove(&probed);
                    }
                    state.heap.push(Reverse(ProbeKey(probed)));
                } else {
                    trace!(ip = %probed.ip, port = probed.port, "discarding probe result for removed peer");
                }
            });
        }
    }

    /// Halt scheduling. In-flight probes are allowed to complete; their
    /// results are discarded.
    pub async fn stop(&self) {
        self.running.store(false, AtomicOrdering::SeqCst);
        if let Some(token) = self.cancel.lock().await.take() {
            token.cancel();
        }
        let mut state = self.state.lock().await;
        state.actives.clear();
        state.heap.clear();
    }
}
