//! The durable emitter
//!
//! [`DurableEmitter`] wraps a [`Bus`]. Every message is forwarded to the
//! wrapped bus; messages on registered topics are also buffered and
//! persisted in batches by a background flush worker.
//!
//! Construction is synchronous. Login, partition open and compaction on
//! open run on a spawned task; until it finishes, persistence is inert and
//! the emitter behaves exactly like the wrapped bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::Mutex;
use tidepool_core::{Bus, BusError, Message};
use tidepool_storage::{
    Datastore, LocalSessionProvider, RedbDatastore, RedbDatastoreConfig, Schema, Session,
    SessionProvider,
};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::buffer::MessageBuffer;
use crate::compaction::{CompactionMonitor, CompactionPolicy};
use crate::config::{EmitterConfig, EmitterSettings};
use crate::error::{EmitError, EmitterError, EmitterResult};
use crate::registry::{PartitionPool, TopicRegistry};
use crate::status::{EmitterMetrics, EmitterStatus, PersistenceState};
use crate::ticker::Ticker;
use crate::writer::{BulkWriter, FlushReport};

/// What asked for a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushTrigger {
    /// Sync interval elapsed on emit
    Inline,
    /// Background ticker
    Periodic,
    /// `flush_now` or close
    Manual,
}

/// Everything that exists only once initialization succeeded
struct Persistence {
    pool: Arc<PartitionPool>,
    session: Session,
    sessions: Arc<dyn SessionProvider>,
    monitor: CompactionMonitor,
}

struct Shared {
    registry: Arc<TopicRegistry>,
    settings: EmitterSettings,
    schema: Schema,
    buffer: MessageBuffer,
    metrics: Arc<EmitterMetrics>,
    compacting: Arc<AtomicBool>,
    last_flush: Mutex<Instant>,
    closed: AtomicBool,
    state: watch::Sender<PersistenceState>,
    persistence: OnceLock<Persistence>,
    flush_gate: Arc<AsyncMutex<()>>,
    flush_tx: mpsc::UnboundedSender<FlushTrigger>,
    flush_ticker: Arc<Ticker>,
    compaction_ticker: Ticker,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn set_state(&self, state: PersistenceState) {
        self.state.send_replace(state);
    }

    /// Buffer a message if its topic is persisted and persistence is ready
    fn capture(&self, message: &Message) {
        if !self.registry.contains(&message.topic) {
            return;
        }
        if self.persistence.get().is_none() || !self.state.borrow().is_ready() {
            self.metrics.record_skipped_inert();
            return;
        }
        if !self.buffer.push(message.clone()) {
            return;
        }
        self.metrics.record_buffered();

        let now = Instant::now();
        let mut last_flush = self.last_flush.lock();
        if self.compacting.load(Ordering::SeqCst)
            || now.duration_since(*last_flush) <= self.settings.sync_interval()
        {
            return;
        }
        if self.flush_tx.send(FlushTrigger::Inline).is_err() {
            warn!("Flush worker gone, inline flush skipped");
        }
        *last_flush = now;
    }

    /// Drain the buffer and write it out
    #[instrument(skip(self))]
    async fn flush(&self, trigger: FlushTrigger) -> FlushReport {
        let Some(persistence) = self.persistence.get() else {
            return FlushReport::default();
        };

        let _gate = self.flush_gate.lock().await;
        let snapshot = self.buffer.drain();
        if snapshot.is_empty() {
            return FlushReport::default();
        }
        self.metrics.record_flush();
        let count = snapshot.len();

        let pool = persistence.pool.clone();
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        let result = tokio::task::spawn_blocking(move || {
            BulkWriter::write(&pool, &registry, snapshot, &metrics)
        })
        .await;

        match result {
            Ok(report) => {
                debug!(
                    messages = count,
                    written = report.records_written(),
                    dropped = report.records_dropped(),
                    "Flush finished"
                );
                report
            }
            Err(e) => {
                error!(messages = count, error = %e, "Flush task failed");
                self.metrics
                    .record_batch_failed(count, format!("flush task failed: {e}"));
                FlushReport::default()
            }
        }
    }
}

/// A bus wrapper that persists selected topics
///
/// Delivery through the wrapped bus never waits on persistence, and no
/// persistence failure is ever returned from [`emit`](Self::emit); see
/// [`status`](Self::status) for degraded operation.
pub struct DurableEmitter<B: Bus> {
    base: B,
    shared: Arc<Shared>,
    init: Mutex<Option<JoinHandle<()>>>,
}

impl<B: Bus> DurableEmitter<B> {
    /// Create an emitter over `base`
    ///
    /// Only configuration errors are returned. Login and partition open run
    /// in the background; use [`wait_ready`](Self::wait_ready) to observe
    /// their outcome. Must be called from within a Tokio runtime.
    pub fn new(
        base: B,
        config: EmitterConfig,
        datastore: Arc<dyn Datastore>,
        sessions: Arc<dyn SessionProvider>,
    ) -> EmitterResult<Self> {
        config.settings.validate()?;
        config
            .schema
            .check_name()
            .map_err(|e| EmitterError::Config(e.to_string()))?;
        let registry = Arc::new(TopicRegistry::new(&config.topics)?);

        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let (compact_tx, compact_rx) = mpsc::unbounded_channel();

        let periodic_tx = flush_tx.clone();
        let flush_ticker = Arc::new(Ticker::new(
            "flush",
            config.settings.cleanup_interval(),
            move || {
                let _ = periodic_tx.send(FlushTrigger::Periodic);
            },
        ));
        let compaction_ticker = Ticker::new(
            "compaction",
            config.settings.compaction_interval(),
            move || {
                let _ = compact_tx.send(());
            },
        );

        let (state, _) = watch::channel(PersistenceState::Initializing);

        let shared = Arc::new(Shared {
            registry,
            settings: config.settings,
            schema: config.schema,
            buffer: MessageBuffer::new(),
            metrics: Arc::new(EmitterMetrics::new()),
            compacting: Arc::new(AtomicBool::new(false)),
            last_flush: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            state,
            persistence: OnceLock::new(),
            flush_gate: Arc::new(AsyncMutex::new(())),
            flush_tx,
            flush_ticker,
            compaction_ticker,
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        });

        info!(
            topics = shared.registry.len(),
            partitions = shared.registry.partitions().len(),
            "Durable emitter created"
        );

        let setup = tokio::spawn(initialize(
            shared.clone(),
            datastore,
            sessions,
            flush_rx,
            compact_rx,
        ));
        let init = tokio::spawn(supervise_init(shared.clone(), setup));

        Ok(Self {
            base,
            shared,
            init: Mutex::new(Some(init)),
        })
    }

    /// Create an emitter persisting to redb files under the configured data
    /// directory, with a local session provider
    pub fn with_local_storage(base: B, config: EmitterConfig) -> EmitterResult<Self> {
        let datastore = RedbDatastore::new(RedbDatastoreConfig::with_base_dir(
            config.settings.data_dir.clone(),
        ));
        Self::new(
            base,
            config,
            Arc::new(datastore),
            Arc::new(LocalSessionProvider::new()),
        )
    }

    /// Publish a message
    ///
    /// Fails with [`EmitError::Closed`] after [`close`](Self::close) without
    /// forwarding. Otherwise the message is captured for persistence (when
    /// its topic is registered) and forwarded to the wrapped bus, whose
    /// result is returned.
    pub async fn emit(&self, message: Message) -> Result<(), EmitError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(EmitError::Closed);
        }

        self.shared.capture(&message);
        self.base.publish(message).await?;
        Ok(())
    }

    /// Flush the buffer now
    pub async fn flush_now(&self) -> FlushReport {
        self.shared.flush(FlushTrigger::Manual).await
    }

    /// Snapshot of the emitter state and counters
    pub fn status(&self) -> EmitterStatus {
        self.shared.metrics.snapshot(
            self.shared.state.borrow().clone(),
            self.shared.buffer.len(),
            self.shared.compacting.load(Ordering::SeqCst),
        )
    }

    /// Wait until initialization has finished
    ///
    /// Returns the resulting state: `Ready`, `Failed` or, if the emitter was
    /// closed meanwhile, `Closed`.
    pub async fn wait_ready(&self) -> PersistenceState {
        let mut rx = self.shared.state.subscribe();
        match rx
            .wait_for(|state| !matches!(state, PersistenceState::Initializing))
            .await
        {
            Ok(state) => state.clone(),
            Err(_) => self.shared.state.borrow().clone(),
        }
    }

    /// The wrapped bus
    pub fn base(&self) -> &B {
        &self.base
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Shut the emitter down
    ///
    /// The first call stops both timers and the workers, flushes what is
    /// left in the buffer (unless `flush_on_close` is off), closes every
    /// partition once, logs the session out and closes the wrapped bus.
    /// Later calls return `Ok(())` without doing anything.
    pub async fn close(&self) -> EmitterResult<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Closing durable emitter");

        self.shared.buffer.seal();
        self.shared.flush_ticker.shutdown();
        self.shared.compaction_ticker.shutdown();
        self.shared.shutdown.cancel();

        let init = self.init.lock().take();
        if let Some(init) = init {
            if let Err(e) = init.await {
                warn!(error = %e, "Initialization task failed");
            }
        }
        let workers = std::mem::take(&mut *self.shared.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker task failed");
            }
        }

        if self.shared.settings.flush_on_close {
            let report = self.shared.flush(FlushTrigger::Manual).await;
            if !report.is_empty() {
                info!(
                    written = report.records_written(),
                    dropped = report.records_dropped(),
                    "Final flush"
                );
            }
        } else {
            let discarded = self.shared.buffer.drain().len();
            if discarded > 0 {
                warn!(discarded, "Discarding buffered messages on close");
            }
        }

        if let Some(persistence) = self.shared.persistence.get() {
            persistence.pool.close();
            if let Err(e) = persistence.sessions.logout(&persistence.session).await {
                warn!(error = %e, "Logout failed");
            }
        }

        self.shared.set_state(PersistenceState::Closed);
        self.base.close().await?;
        info!("Durable emitter closed");
        Ok(())
    }
}

impl<B: Bus> Drop for DurableEmitter<B> {
    fn drop(&mut self) {
        // Stop background work even when close() was never called
        self.shared.flush_ticker.shutdown();
        self.shared.compaction_ticker.shutdown();
        self.shared.shutdown.cancel();
    }
}

#[async_trait]
impl<B: Bus> Bus for DurableEmitter<B> {
    async fn publish(&self, message: Message) -> Result<(), BusError> {
        self.emit(message).await.map_err(BusError::from)
    }

    async fn close(&self) -> Result<(), BusError> {
        DurableEmitter::close(self).await.map_err(|e| match e {
            EmitterError::Bus(inner) => inner,
            other => BusError::DeliveryFailed(other.to_string()),
        })
    }
}

/// Log in, open every partition and start the background work
async fn initialize(
    shared: Arc<Shared>,
    datastore: Arc<dyn Datastore>,
    sessions: Arc<dyn SessionProvider>,
    flush_rx: mpsc::UnboundedReceiver<FlushTrigger>,
    compact_rx: mpsc::UnboundedReceiver<()>,
) {
    let session = match sessions.login(shared.settings.credentials.as_ref()).await {
        Ok(session) => session,
        Err(e) => {
            fail(&shared, format!("login failed: {e}"));
            return;
        }
    };

    let pool = match PartitionPool::open(
        datastore.as_ref(),
        &session,
        &shared.schema,
        shared.registry.partitions(),
    )
    .await
    {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            if let Err(logout_err) = sessions.logout(&session).await {
                warn!(error = %logout_err, "Logout failed");
            }
            fail(&shared, format!("failed to open partitions: {e}"));
            return;
        }
    };

    let monitor = CompactionMonitor::new(
        CompactionPolicy::from_megabytes(shared.settings.compaction_threshold_mb),
        shared.compacting.clone(),
        shared.flush_ticker.clone(),
        shared.flush_gate.clone(),
        shared.metrics.clone(),
    );
    if shared.settings.compact_on_open {
        monitor.compact_on_open(&pool).await;
    }

    let persistence = Persistence {
        pool,
        session,
        sessions,
        monitor,
    };
    if shared.persistence.set(persistence).is_err() {
        warn!("Persistence initialized twice");
        return;
    }

    // close() tears down what was opened; nothing more to start
    if shared.shutdown.is_cancelled() {
        debug!("Emitter closed during initialization");
        return;
    }

    let flush = tokio::spawn(flush_worker(shared.clone(), flush_rx));
    let compaction = tokio::spawn(compaction_worker(shared.clone(), compact_rx));
    shared.workers.lock().extend([flush, compaction]);

    shared.flush_ticker.start();
    shared.compaction_ticker.start();
    shared.set_state(PersistenceState::Ready);
    info!("Persistence ready");
}

/// Turn a panic during initialization into a failed state
async fn supervise_init(shared: Arc<Shared>, setup: JoinHandle<()>) {
    if let Err(e) = setup.await {
        fail(&shared, format!("initialization panicked: {e}"));
    }
}

fn fail(shared: &Shared, reason: String) {
    error!(reason = %reason, "Persistence disabled, forwarding only");
    shared.metrics.record_error(reason.clone());
    shared.set_state(PersistenceState::Failed(reason));
}

async fn flush_worker(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<FlushTrigger>) {
    debug!("Flush worker started");
    loop {
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            trigger = rx.recv() => match trigger {
                Some(trigger) => {
                    shared.flush(trigger).await;
                }
                None => break,
            },
        }
    }
    debug!("Flush worker stopped");
}

async fn compaction_worker(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<()>) {
    debug!("Compaction worker started");
    loop {
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            tick = rx.recv() => match tick {
                Some(()) => {
                    if let Some(persistence) = shared.persistence.get() {
                        let report = persistence.monitor.check(&persistence.pool).await;
                        if !report.compacted.is_empty() || !report.failed.is_empty() {
                            info!(
                                compacted = report.compacted.len(),
                                failed = report.failed.len(),
                                "Compaction pass finished"
                            );
                        }
                    }
                }
                None => break,
            },
        }
    }
    debug!("Compaction worker stopped");
}
