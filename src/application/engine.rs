use crate::domain::duration_policy::{minutes_to_seconds, resolve};
use crate::domain::models::{
    DurationConfig, PhaseCompletedEvent, TimerPhase, TimerState, TimerStateSnapshot,
};
use crate::domain::timer::PhaseCompletion;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notification::NotificationSink;
use crate::infrastructure::session_gateway::SessionGateway;
use crate::infrastructure::snapshot_store::TimerSnapshotStore;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

const PHASE_EVENT_CAPACITY: usize = 16;

#[derive(Clone)]
pub struct EngineOptions {
    /// `None` leaves ticking to the host, which then calls
    /// [`FocusEngine::tick`] itself.
    pub tick_interval: Option<Duration>,
    pub now_provider: NowProvider,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            tick_interval: Some(Duration::from_secs(1)),
            now_provider: Arc::new(Utc::now),
        }
    }
}

impl EngineOptions {
    pub fn manual_ticks(mut self) -> Self {
        self.tick_interval = None;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }
}

struct EngineCore {
    state: TimerState,
    config: DurationConfig,
    /// Bumped on every committed mutation.
    revision: u64,
    /// Wall-clock instant the running countdown has been applied up to.
    /// Running snapshots are stamped with it so fractions of a second carry
    /// over to the next rehydration.
    counted_until: DateTime<Utc>,
}

struct EngineInner<G, S, N> {
    core: Mutex<EngineCore>,
    gateway: Arc<G>,
    store: Arc<S>,
    notifier: Arc<N>,
    options: EngineOptions,
    ticker: std::sync::Mutex<Option<JoinHandle<()>>>,
    reports: std::sync::Mutex<JoinSet<()>>,
    reported_sessions: std::sync::Mutex<HashSet<String>>,
    starting: AtomicBool,
    stop_epoch: AtomicU64,
    state_tx: watch::Sender<TimerState>,
    events_tx: broadcast::Sender<PhaseCompletedEvent>,
}

/// Owns the one timer of a device: commands, the tick loop, snapshots and
/// reconciliation with the session gateway.
pub struct FocusEngine<G, S, N>
where
    G: SessionGateway + 'static,
    S: TimerSnapshotStore + 'static,
    N: NotificationSink + 'static,
{
    inner: Arc<EngineInner<G, S, N>>,
}

impl<G, S, N> Clone for FocusEngine<G, S, N>
where
    G: SessionGateway + 'static,
    S: TimerSnapshotStore + 'static,
    N: NotificationSink + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Clears the in-flight start marker however `start_focus` exits.
struct StartGuard<'a>(&'a AtomicBool);

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<G, S, N> FocusEngine<G, S, N>
where
    G: SessionGateway + 'static,
    S: TimerSnapshotStore + 'static,
    N: NotificationSink + 'static,
{
    pub fn new(
        config: DurationConfig,
        gateway: Arc<G>,
        store: Arc<S>,
        notifier: Arc<N>,
        options: EngineOptions,
    ) -> Self {
        let state = TimerState::idle(&config);
        let counted_until = (options.now_provider)();
        let (state_tx, _) = watch::channel(state.clone());
        let (events_tx, _) = broadcast::channel(PHASE_EVENT_CAPACITY);

        Self {
            inner: Arc::new(EngineInner {
                core: Mutex::new(EngineCore {
                    state,
                    config,
                    revision: 0,
                    counted_until,
                }),
                gateway,
                store,
                notifier,
                options,
                ticker: std::sync::Mutex::new(None),
                reports: std::sync::Mutex::new(JoinSet::new()),
                reported_sessions: std::sync::Mutex::new(HashSet::new()),
                starting: AtomicBool::new(false),
                stop_epoch: AtomicU64::new(0),
                state_tx,
                events_tx,
            }),
        }
    }

    /// Rehydrates from the last snapshot, catches up on wall-clock time that
    /// passed meanwhile, and reconciles with the server's active session.
    pub async fn init(&self) -> TimerState {
        let revision = {
            let mut core = self.inner.core.lock().await;
            self.cancel_ticker();
            let config = core.config.clone();
            let now = self.now();

            let mut completion = None;
            let mut counted_until = now;
            let state = match self.inner.store.load() {
                Ok(Some(snapshot)) => {
                    let mut state = snapshot.state.clone();
                    let elapsed = snapshot.elapsed_seconds(now);
                    completion = state.advance(elapsed, &config);
                    if state.is_running {
                        counted_until = snapshot.caught_up_to(elapsed).unwrap_or(now);
                    }
                    if completion.is_some() {
                        info!(
                            phase = snapshot.state.phase.as_str(),
                            elapsed_seconds = elapsed,
                            "phase finished while away"
                        );
                    }
                    state
                }
                Ok(None) => TimerState::idle(&config),
                Err(error @ InfraError::PersistenceCorrupt(_)) => {
                    warn!(%error, "discarding unreadable timer snapshot");
                    if let Err(error) = self.inner.store.clear() {
                        error!(%error, "failed to clear unreadable timer snapshot");
                    }
                    TimerState::idle(&config)
                }
                Err(error) => {
                    error!(%error, "failed to load timer snapshot; starting idle");
                    TimerState::idle(&config)
                }
            };
            core.state = state;
            core.counted_until = counted_until;

            self.commit(&mut core);
            if let Some(completion) = completion {
                self.after_completion(&completion);
            }
            core.revision
        };

        self.reconcile_with_server(revision).await;

        let core = self.inner.core.lock().await;
        if core.state.is_running {
            self.spawn_ticker();
        }
        debug!(status = ?core.state.status(), "engine initialized");
        core.state.clone()
    }

    /// Stops ticking, writes a final snapshot and waits for pending session
    /// reports.
    pub async fn dispose(&self) {
        self.on_detach().await;
        self.flush_reports().await;
    }

    /// Host became visible again.
    pub async fn on_attach(&self) -> TimerState {
        self.init().await
    }

    /// Host is going to the background: the countdown continues on the wall
    /// clock and is caught up by the next [`Self::on_attach`].
    pub async fn on_detach(&self) {
        let core = self.inner.core.lock().await;
        self.cancel_ticker();
        self.persist(&core);
    }

    pub async fn state(&self) -> TimerState {
        self.inner.core.lock().await.state.clone()
    }

    pub async fn config(&self) -> DurationConfig {
        self.inner.core.lock().await.config.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerState> {
        self.inner.state_tx.subscribe()
    }

    pub fn phase_events(&self) -> broadcast::Receiver<PhaseCompletedEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn is_ticking(&self) -> bool {
        self.lock_ticker()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// New settings apply to phases started from now on.
    pub async fn update_config(&self, config: DurationConfig) -> TimerState {
        let mut core = self.inner.core.lock().await;
        core.config = config;
        let config = core.config.clone();
        core.state.retarget_idle(&config);
        self.commit(&mut core);
        core.state.clone()
    }

    pub async fn start_focus(
        &self,
        context_id: Option<String>,
        duration_minutes: Option<u32>,
    ) -> Result<TimerState, InfraError> {
        let context_id = context_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned);
        if duration_minutes == Some(0) {
            return Err(InfraError::InvalidConfig(
                "duration_minutes must be > 0".to_string(),
            ));
        }

        let (target_seconds, epoch) = {
            let core = self.inner.core.lock().await;
            if core.state.is_running {
                return Err(InfraError::InvalidState("timer is already running".to_string()));
            }
            if self.inner.starting.swap(true, Ordering::SeqCst) {
                return Err(InfraError::InvalidState(
                    "a focus start is already in progress".to_string(),
                ));
            }
            let target_seconds = duration_minutes
                .map(minutes_to_seconds)
                .unwrap_or_else(|| resolve(TimerPhase::Focus, &core.config));
            (target_seconds, self.inner.stop_epoch.load(Ordering::SeqCst))
        };
        let _start_guard = StartGuard(&self.inner.starting);

        let handle = match self
            .inner
            .gateway
            .start_focus_session(context_id.as_deref(), target_seconds)
            .await
        {
            Ok(handle) => handle,
            Err(error) => {
                warn!(%error, "focus session was not started");
                return Err(error);
            }
        };

        let mut core = self.inner.core.lock().await;
        if self.inner.stop_epoch.load(Ordering::SeqCst) != epoch || core.state.is_running {
            info!(session_id = %handle.id, "focus start overtaken by another command");
            self.report_session_end(&handle.id, false, true);
            return Err(InfraError::InvalidState(
                "focus start was cancelled".to_string(),
            ));
        }

        let superseded = core.state.server_session_id.take();
        core.state
            .begin(
                TimerPhase::Focus,
                target_seconds,
                context_id,
                Some(handle.id.clone()),
            )
            .map_err(InfraError::InvalidState)?;
        core.counted_until = self.now();
        self.commit(&mut core);
        self.spawn_ticker();

        if let Some(previous) = superseded {
            self.report_session_end(&previous, false, true);
        }
        info!(
            session_id = %handle.id,
            target_seconds,
            "focus session started"
        );
        Ok(core.state.clone())
    }

    /// Starts a phase of any kind with an explicit length. Breaks stay local;
    /// a focus phase is registered with the gateway like [`Self::start_focus`].
    pub async fn start_standalone(
        &self,
        duration_minutes: u32,
        phase: TimerPhase,
    ) -> Result<TimerState, InfraError> {
        if phase == TimerPhase::Focus {
            return self.start_focus(None, Some(duration_minutes)).await;
        }
        if duration_minutes == 0 {
            return Err(InfraError::InvalidConfig(
                "duration_minutes must be > 0".to_string(),
            ));
        }

        let mut core = self.inner.core.lock().await;
        if core.state.is_running || self.inner.starting.load(Ordering::SeqCst) {
            return Err(InfraError::InvalidState("timer is already running".to_string()));
        }

        let abandoned = core.state.server_session_id.take();
        core.state
            .begin(phase, minutes_to_seconds(duration_minutes), None, None)
            .map_err(InfraError::InvalidState)?;
        core.counted_until = self.now();
        self.commit(&mut core);
        self.spawn_ticker();

        if let Some(previous) = abandoned {
            self.report_session_end(&previous, false, true);
        }
        info!(phase = phase.as_str(), duration_minutes, "break started");
        Ok(core.state.clone())
    }

    pub async fn pause(&self) -> Result<TimerState, InfraError> {
        let mut core = self.inner.core.lock().await;
        core.state.pause().map_err(InfraError::InvalidState)?;
        self.cancel_ticker();
        self.commit(&mut core);
        debug!(remaining_seconds = core.state.remaining_seconds, "timer paused");
        Ok(core.state.clone())
    }

    pub async fn resume(&self) -> Result<TimerState, InfraError> {
        let mut core = self.inner.core.lock().await;
        core.state.resume().map_err(InfraError::InvalidState)?;
        core.counted_until = self.now();
        self.commit(&mut core);
        self.spawn_ticker();
        debug!(
            phase = core.state.phase.as_str(),
            remaining_seconds = core.state.remaining_seconds,
            "timer resumed"
        );
        Ok(core.state.clone())
    }

    /// Always lands in idle. The server is told about a linked session in the
    /// background; the local transition does not wait for it.
    pub async fn stop(&self, completed: bool) -> TimerState {
        let mut core = self.inner.core.lock().await;
        self.inner.stop_epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel_ticker();
        if core.state.is_idle() {
            return core.state.clone();
        }

        let config = core.config.clone();
        let session_id = core.state.stop(&config);
        self.commit(&mut core);
        if let Some(session_id) = session_id {
            self.report_session_end(&session_id, completed, !completed);
        }
        info!(completed, "timer stopped");
        core.state.clone()
    }

    pub async fn skip(&self) -> Result<TimerState, InfraError> {
        let mut core = self.inner.core.lock().await;
        let config = core.config.clone();
        core.state
            .skip_break(&config)
            .map_err(InfraError::InvalidState)?;
        self.cancel_ticker();
        self.commit(&mut core);
        debug!("break skipped");
        Ok(core.state.clone())
    }

    /// Starts a new cycle: stops whatever runs and zeroes the completed focus
    /// counter.
    pub async fn reset_cycle(&self) -> TimerState {
        self.stop(false).await;
        let mut core = self.inner.core.lock().await;
        core.state.completed_focus_count = 0;
        self.commit(&mut core);
        info!("focus cycle reset");
        core.state.clone()
    }

    /// One second of countdown, for hosts that drive the clock themselves.
    pub async fn tick(&self) -> Option<PhaseCompletedEvent> {
        self.apply_elapsed(1).await.0
    }

    /// Waits until every queued session report has been delivered or failed.
    pub async fn flush_reports(&self) {
        loop {
            let mut pending = std::mem::take(
                &mut *self
                    .inner
                    .reports
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if pending.is_empty() {
                break;
            }
            while let Some(result) = pending.join_next().await {
                if let Err(error) = result {
                    warn!(%error, "session report task failed");
                }
            }
        }
    }

    /// Returns the completion event, if any, and whether the timer is still
    /// running afterwards.
    async fn apply_elapsed(&self, seconds: u64) -> (Option<PhaseCompletedEvent>, bool) {
        let mut core = self.inner.core.lock().await;
        let config = core.config.clone();
        if core.state.is_running {
            let counted = seconds.min(u64::from(u32::MAX)) as i64;
            core.counted_until += chrono::Duration::seconds(counted);
        }
        let Some(completion) = core.state.advance(seconds, &config) else {
            if core.state.is_running {
                self.inner.state_tx.send_replace(core.state.clone());
            }
            return (None, core.state.is_running);
        };

        self.commit(&mut core);
        self.after_completion(&completion);
        (Some(completion.to_event()), core.state.is_running)
    }

    async fn reconcile_with_server(&self, revision: u64) {
        let active = match self.inner.gateway.get_active_session().await {
            Ok(active) => active,
            Err(error) => {
                warn!(%error, "could not query active focus session; keeping local state");
                return;
            }
        };
        let Some(active) = active else {
            return;
        };
        if self.was_reported(&active.id) {
            debug!(session_id = %active.id, "active session already reported ended");
            return;
        }
        // an expired session is one this device finished before its end
        // report went out, or one nobody is counting down any more
        let now = self.now();
        let remaining = active.remaining_seconds_at(now);
        if remaining == 0 {
            info!(session_id = %active.id, "server session already ran out; reporting it ended");
            self.report_session_end(&active.id, true, false);
            return;
        }

        let mut core = self.inner.core.lock().await;
        if core.revision != revision {
            debug!("state changed during reconciliation; keeping local state");
            return;
        }
        if core.state.server_session_id.as_deref() == Some(active.id.as_str()) {
            return;
        }

        if let Some(previous) = core.state.server_session_id.as_deref() {
            warn!(
                previous_session_id = previous,
                session_id = %active.id,
                "replacing local session with the server's active session"
            );
        }
        core.state.adopt_session(&active, now);
        let counted = active.target_duration_seconds - remaining;
        core.counted_until = active.started_at + chrono::Duration::seconds(i64::from(counted));
        self.commit(&mut core);
        info!(
            session_id = %active.id,
            remaining_seconds = core.state.remaining_seconds,
            "adopted active focus session from server"
        );
    }

    fn now(&self) -> DateTime<Utc> {
        (self.inner.options.now_provider)()
    }

    /// Snapshot first, then observers. Callers hold the core lock.
    fn commit(&self, core: &mut EngineCore) {
        core.revision = core.revision.wrapping_add(1);
        self.persist(core);
        self.inner.state_tx.send_replace(core.state.clone());
    }

    fn persist(&self, core: &EngineCore) {
        let now = self.now();
        let persisted_at = if core.state.is_running {
            core.counted_until.min(now)
        } else {
            now
        };
        let snapshot = TimerStateSnapshot::new(core.state.clone(), persisted_at);
        if let Err(error) = self.inner.store.save(&snapshot) {
            error!(%error, "failed to persist timer snapshot");
        }
    }

    fn after_completion(&self, completion: &PhaseCompletion) {
        info!(
            completed_phase = completion.completed_phase.as_str(),
            next_phase = completion.next_phase.as_str(),
            completed_focus_count = completion.completed_focus_count,
            "phase completed"
        );
        self.inner
            .notifier
            .announce_phase_complete(completion.completed_phase);
        if let Some(session_id) = completion.ended_session_id.as_deref() {
            self.report_session_end(session_id, true, false);
        }
        let _ = self.inner.events_tx.send(completion.to_event());
    }

    fn was_reported(&self, session_id: &str) -> bool {
        self.inner
            .reported_sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(session_id)
    }

    fn report_session_end(&self, session_id: &str, completed: bool, interrupted: bool) {
        self.inner
            .reported_sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string());

        let gateway = Arc::clone(&self.inner.gateway);
        let session_id = session_id.to_string();
        self.inner
            .reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .spawn(async move {
                match gateway.end_session(&session_id, completed, interrupted).await {
                    Ok(()) => debug!(%session_id, completed, interrupted, "session end reported"),
                    Err(error) => warn!(
                        %error,
                        %session_id,
                        completed,
                        interrupted,
                        "failed to report session end; server record may stay open"
                    ),
                }
            });
    }

    fn lock_ticker(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_ticker(&self) {
        let Some(period) = self.inner.options.tick_interval else {
            return;
        };
        let mut ticker = self.lock_ticker();
        if let Some(handle) = ticker.take() {
            handle.abort();
        }
        let engine = Arc::downgrade(&self.inner);
        *ticker = Some(tokio::spawn(run_ticker(engine, period)));
    }

    fn cancel_ticker(&self) {
        if let Some(handle) = self.lock_ticker().take() {
            handle.abort();
        }
    }
}

/// Counts whole seconds of monotonic time, so a late wake-up catches up
/// instead of drifting.
async fn run_ticker<G, S, N>(engine: Weak<EngineInner<G, S, N>>, period: Duration)
where
    G: SessionGateway + 'static,
    S: TimerSnapshotStore + 'static,
    N: NotificationSink + 'static,
{
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut counted_until = Instant::now();

    loop {
        interval.tick().await;
        let elapsed = counted_until.elapsed().as_secs();
        if elapsed == 0 {
            continue;
        }
        counted_until += Duration::from_secs(elapsed);

        let Some(inner) = engine.upgrade() else {
            break;
        };
        let (_, still_running) = FocusEngine { inner }.apply_elapsed(elapsed).await;
        if !still_running {
            break;
        }
    }
}
