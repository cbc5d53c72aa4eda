//! Reconciliation controller
//!
//! Watches every known guild's `state` key and converges local playback
//! toward it: a playing guild gets a session once its lease is won, a stopped
//! guild's session is cancelled.
//!
//! Each guild is reconciled by its own worker task so a guild stuck waiting
//! for a lease never holds up the others. Triggers for a busy worker coalesce
//! into a single re-run.
//!
//! Shutdown closes admission first and then waits for running sessions to
//! drain. The change stream stays up while draining so stop requests still
//! reach sessions that are finishing their current track.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use hiqty_core::bootstrap::Services;
use hiqty_core::config::PlayerConfig;
use hiqty_core::models::generate_id;
use hiqty_core::store::purge_guild;
use hiqty_core::voice::{GuildEvent, VoiceTransport};
use hiqty_core::{DesiredState, Lease, LeaseManager};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::registry::{SessionHandle, SessionRegistry};
use crate::session::{PlaybackSession, SessionContext, SessionExit};
use crate::watcher::{KeyStream, Watcher};
use crate::Result;

const RECONNECT_INITIAL: Duration = Duration::from_secs(1);

/// What one reconcile step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Stopped with nothing running
    Idle,
    /// Cancelled the local session
    Stopped,
    /// Playing and a local session already runs
    AlreadyPlaying,
    /// Won the lease and started a session
    Spawned,
    /// Gave up on the lease: no longer playing, or shutting down
    Abandoned,
}

pub struct PlayerController {
    ctx: SessionContext,
    sessions: SessionRegistry,
    session_tasks: TaskTracker,
    worker_tasks: TaskTracker,
    /// Serializes subscribe/unsubscribe on the watcher connection
    watcher: tokio::sync::Mutex<Option<Watcher>>,
    guilds: parking_lot::Mutex<HashSet<String>>,
    workers: parking_lot::Mutex<HashMap<String, mpsc::Sender<()>>>,
    scan_batch: usize,
}

impl PlayerController {
    pub fn new(
        services: &Services,
        voice: Arc<dyn VoiceTransport>,
        node_id: impl Into<String>,
        settings: PlayerConfig,
    ) -> Self {
        let leases = LeaseManager::new(services.store.clone(), node_id, settings.lease_ttl());
        Self {
            ctx: SessionContext {
                store: services.store.clone(),
                keys: services.keys.clone(),
                leases,
                backends: services.backends.clone(),
                voice,
                settings,
            },
            sessions: SessionRegistry::new(),
            session_tasks: TaskTracker::new(),
            worker_tasks: TaskTracker::new(),
            watcher: tokio::sync::Mutex::new(None),
            guilds: parking_lot::Mutex::new(HashSet::new()),
            workers: parking_lot::Mutex::new(HashMap::new()),
            scan_batch: 100,
        }
    }

    #[must_use]
    pub fn with_scan_batch(mut self, scan_batch: usize) -> Self {
        self.scan_batch = scan_batch.max(1);
        self
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        self.ctx.leases.node_id()
    }

    #[must_use]
    pub fn has_session(&self, guild_id: &str) -> bool {
        self.sessions.contains(guild_id)
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn known_guilds(&self) -> Vec<String> {
        self.guilds.lock().iter().cloned().collect()
    }

    async fn desired_state(&self, guild_id: &str) -> Result<DesiredState> {
        let value = self.ctx.store.get(&self.ctx.keys.state(guild_id)).await?;
        Ok(DesiredState::from_value(value.as_deref()))
    }

    /// Converge one guild toward its desired state.
    ///
    /// For a playing guild this blocks until the lease is won or the attempt
    /// is abandoned. Store errors end the step; the next trigger retries.
    pub async fn reconcile(
        self: &Arc<Self>,
        guild_id: &str,
        admission: &CancellationToken,
    ) -> Result<ReconcileOutcome> {
        match self.desired_state(guild_id).await? {
            DesiredState::Stopped => match self.sessions.remove(guild_id) {
                Some(handle) => {
                    info!(guild_id = %guild_id, "Stop requested, cancelling session");
                    handle.cancel.cancel();
                    Ok(ReconcileOutcome::Stopped)
                }
                None => Ok(ReconcileOutcome::Idle),
            },
            DesiredState::Playing => {
                if self.sessions.contains(guild_id) {
                    return Ok(ReconcileOutcome::AlreadyPlaying);
                }
                let spawned = match self.acquire(guild_id, admission).await? {
                    Some(lease) => self.spawn_session(guild_id, lease, admission),
                    None => false,
                };
                Ok(if spawned {
                    ReconcileOutcome::Spawned
                } else {
                    ReconcileOutcome::Abandoned
                })
            }
        }
    }

    /// Retry the lease on a fixed interval while the guild stays playing
    async fn acquire(&self, guild_id: &str, admission: &CancellationToken) -> Result<Option<Lease>> {
        let key = self.ctx.keys.player_lock(guild_id);
        let mut contended = false;

        loop {
            if admission.is_cancelled() {
                return Ok(None);
            }
            if let Some(lease) = self.ctx.leases.acquire(&key).await? {
                if admission.is_cancelled() {
                    self.ctx.leases.release(lease).await;
                    return Ok(None);
                }
                return Ok(Some(lease));
            }

            if contended {
                debug!(guild_id = %guild_id, "Lease still held elsewhere");
            } else {
                warn!(guild_id = %guild_id, lease_key = %key, "Lease held elsewhere, retrying");
                contended = true;
            }

            tokio::select! {
                () = admission.cancelled() => return Ok(None),
                () = tokio::time::sleep(self.ctx.settings.lock_retry_interval()) => {}
            }
            if self.desired_state(guild_id).await? != DesiredState::Playing {
                debug!(guild_id = %guild_id, "No longer playing, giving up on lease");
                return Ok(None);
            }
        }
    }

    /// Start a session holding `lease`, or release it if none may start
    fn spawn_session(
        self: &Arc<Self>,
        guild_id: &str,
        lease: Lease,
        admission: &CancellationToken,
    ) -> bool {
        let id = generate_id();
        let cancel = CancellationToken::new();
        let handle = SessionHandle {
            id: id.clone(),
            cancel: cancel.clone(),
        };
        // draining already began, or another reconcile of this guild won
        if self.session_tasks.is_closed() || !self.sessions.insert_new(guild_id, handle) {
            let leases = self.ctx.leases.clone();
            self.worker_tasks.spawn(async move {
                leases.release(lease).await;
            });
            return false;
        }

        let session = PlaybackSession::new(
            self.ctx.clone(),
            guild_id,
            lease,
            cancel,
            admission.clone(),
        );
        let this = Arc::clone(self);
        let guild = guild_id.to_string();
        let admission = admission.clone();

        self.session_tasks.spawn(
            async move {
                let exit = session.run().await;
                this.sessions.remove_if(&guild, &id);
                info!(exit = ?exit, "Session finished");

                if admission.is_cancelled() {
                    return;
                }
                match exit {
                    // another node may be free to take over, or this one again
                    SessionExit::LeaseLost => this.trigger(&guild, &admission),
                    // a producer may have queued again while this session was
                    // still registered
                    SessionExit::QueueDrained if this.guilds.lock().contains(&guild) => {
                        this.trigger(&guild, &admission);
                    }
                    _ => {}
                }
            }
            .instrument(info_span!("session", guild_id = %guild_id)),
        );
        true
    }

    /// Queue a reconcile of `guild_id` on its worker, starting one if needed
    pub fn trigger(self: &Arc<Self>, guild_id: &str, admission: &CancellationToken) {
        let mut workers = self.workers.lock();
        if let Some(tx) = workers.get(guild_id) {
            match tx.try_send(()) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(())) => return,
                Err(mpsc::error::TrySendError::Closed(())) => {}
            }
        }

        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(());
        workers.insert(guild_id.to_string(), tx);
        drop(workers);

        let this = Arc::clone(self);
        let guild = guild_id.to_string();
        let admission = admission.clone();
        self.worker_tasks
            .spawn(async move { this.guild_worker(guild, rx, admission).await });
    }

    async fn guild_worker(
        self: Arc<Self>,
        guild_id: String,
        mut triggers: mpsc::Receiver<()>,
        admission: CancellationToken,
    ) {
        while triggers.recv().await.is_some() {
            match self.reconcile(&guild_id, &admission).await {
                Ok(outcome) => debug!(guild_id = %guild_id, outcome = ?outcome, "Reconciled"),
                Err(e) => error!(guild_id = %guild_id, error = %e, "Reconcile failed, skipping cycle"),
            }
        }
    }

    /// Start watching a guild. The subscription confirmation triggers a
    /// reconcile once the controller is running.
    pub async fn add_guild(&self, guild_id: &str) -> Result<()> {
        self.guilds.lock().insert(guild_id.to_string());
        if let Some(watcher) = self.watcher.lock().await.as_mut() {
            watcher.subscribe(&self.ctx.keys.state(guild_id)).await?;
        }
        info!(guild_id = %guild_id, "Guild added");
        Ok(())
    }

    /// Forget a guild for good: stop watching, stop playback, delete its keys
    pub async fn remove_guild(&self, guild_id: &str) -> Result<usize> {
        self.guilds.lock().remove(guild_id);
        if let Some(watcher) = self.watcher.lock().await.as_mut() {
            watcher.unsubscribe(&self.ctx.keys.state(guild_id)).await?;
        }
        self.workers.lock().remove(guild_id);
        if let Some(handle) = self.sessions.remove(guild_id) {
            handle.cancel.cancel();
        }

        let removed =
            purge_guild(self.ctx.store.as_ref(), &self.ctx.keys, guild_id, self.scan_batch).await?;
        info!(guild_id = %guild_id, removed, "Guild removed");
        Ok(removed)
    }

    /// Open a fresh watcher connection and subscribe every known guild
    async fn open_watcher(&self, watch: &CancellationToken) -> Result<KeyStream> {
        let mut slot = self.watcher.lock().await;
        let mut watcher = Watcher::open(self.ctx.store.as_ref(), self.ctx.keys.clone()).await?;
        let changes = watcher.run(watch.clone())?;
        for guild_id in self.known_guilds() {
            watcher.subscribe(&self.ctx.keys.state(&guild_id)).await?;
        }
        *slot = Some(watcher);
        Ok(changes)
    }

    /// Reopen the change stream with exponential backoff. Gives up only on
    /// shutdown, returning a stream that never yields.
    async fn reconnect(&self, watch: &CancellationToken, shutdown: &CancellationToken) -> KeyStream {
        *self.watcher.lock().await = None;
        let max = self.ctx.settings.watcher_reconnect_max().max(RECONNECT_INITIAL);
        let mut delay = RECONNECT_INITIAL;

        loop {
            warn!(retry_in_secs = delay.as_secs(), "Change stream lost, reconnecting");
            tokio::select! {
                () = shutdown.cancelled() => return futures::stream::pending().boxed(),
                () = tokio::time::sleep(delay) => {}
            }

            let reopened: Result<KeyStream> = async {
                self.ctx.store.enable_keyspace_events().await?;
                self.open_watcher(watch).await
            }
            .await;
            match reopened {
                Ok(changes) => {
                    info!("Change stream restored");
                    return changes;
                }
                Err(e) => {
                    error!(error = %e, "Failed to reopen change stream");
                    delay = (delay * 2).min(max);
                }
            }
        }
    }

    fn resync(self: &Arc<Self>, admission: &CancellationToken) {
        let guilds = self.known_guilds();
        debug!(guilds = guilds.len(), "Periodic resync");
        for guild_id in guilds {
            self.trigger(&guild_id, admission);
        }
    }

    /// Run until `shutdown` is cancelled and every session has drained.
    ///
    /// Fails only if keyspace notifications cannot be enabled or the first
    /// watcher connection cannot be opened.
    pub async fn run(
        self: Arc<Self>,
        shutdown: CancellationToken,
        mut guild_events: mpsc::Receiver<GuildEvent>,
    ) -> Result<()> {
        self.ctx.store.enable_keyspace_events().await?;

        let watch = CancellationToken::new();
        let mut changes = self.open_watcher(&watch).await?;
        info!(node_id = %self.node_id(), guilds = self.known_guilds().len(), "Controller started");

        let period = self.ctx.settings.resync_interval();
        let mut resync = interval_at(Instant::now() + period, period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut gateway_open = true;
        let mut draining = false;

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled(), if !draining => {
                    info!(sessions = self.session_count(), "Shutdown requested, draining sessions");
                    draining = true;
                    self.session_tasks.close();
                }
                () = self.session_tasks.wait(), if draining => break,
                event = guild_events.recv(), if gateway_open && !draining => match event {
                    Some(GuildEvent::Create(guild_id)) => {
                        if let Err(e) = self.add_guild(&guild_id).await {
                            error!(guild_id = %guild_id, error = %e, "Failed to add guild");
                        }
                    }
                    Some(GuildEvent::Delete(guild_id)) => {
                        if let Err(e) = self.remove_guild(&guild_id).await {
                            error!(guild_id = %guild_id, error = %e, "Failed to remove guild");
                        }
                    }
                    None => {
                        debug!("Gateway event channel closed");
                        gateway_open = false;
                    }
                },
                key = changes.next() => match key {
                    Some(key) => {
                        if let Some(guild_id) = self.ctx.keys.state_guild(&key) {
                            self.trigger(guild_id, &shutdown);
                        }
                    }
                    None if draining => changes = futures::stream::pending().boxed(),
                    None => changes = self.reconnect(&watch, &shutdown).await,
                },
                _ = resync.tick(), if !draining => self.resync(&shutdown),
            }
        }

        watch.cancel();
        self.workers.lock().clear();
        self.worker_tasks.close();
        self.worker_tasks.wait().await;
        // a worker may have spawned a session after the first wait finished
        self.session_tasks.wait().await;
        *self.watcher.lock().await = None;

        info!("Controller stopped");
        Ok(())
    }
}
