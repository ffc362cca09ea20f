//! Service lifecycle and background loops.
//!
//! # Design
//! - `CoreState` lives behind a `std::sync::Mutex`; every engine call runs to
//!   completion while holding it and never awaits.
//! - Each loop checks the `initialized` flag per iteration and exits on the
//!   shutdown signal instead of re-arming.
//! - Enabling before the host session has started defers initialization to
//!   the `SessionStarted` event.
//! - The event pump resumes from the last event seen before loading, so host
//!   events raised while the document loads are replayed, not lost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use labelplus_config::ConfigPersistence;
use labelplus_core::{CoreError, CoreResult, CoreState, LabelUpdate};
use labelplus_events::{Event, EventBus, EventId};
use labelplus_telemetry::Metrics;
use labelplus_torrent_core::TorrentHost;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::bootstrap::ServiceDeps;
use crate::error::{AppError, AppResult};

const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounded exponential backoff for polling callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up (at least one is always made).
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Deadline for the whole exchange.
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            deadline: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (zero-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

struct Inner {
    host: Arc<dyn TorrentHost>,
    events: EventBus,
    store: Arc<dyn ConfigPersistence>,
    metrics: Metrics,
    save_interval: Duration,
    state: Mutex<Option<CoreState>>,
    initialized: AtomicBool,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, Option<CoreState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &mut CoreState) -> AppResult<()> {
        let saved_at = Utc::now();
        self.store
            .save(&state.document())
            .map_err(|err| AppError::config("config.save", err))?;
        state.mark_saved(saved_at);
        self.metrics.inc_config_save();
        debug!(labels = state.label_count(), "label document saved");
        Ok(())
    }
}

/// Owns the label engine and drives it from host events and timers.
#[derive(Clone)]
pub struct LabelPlusService {
    inner: Arc<Inner>,
}

impl LabelPlusService {
    /// Build a disabled service.
    #[must_use]
    pub fn new(deps: ServiceDeps) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                host: deps.host,
                events: deps.events,
                store: deps.store,
                metrics: deps.metrics,
                save_interval: deps.save_interval,
                state: Mutex::new(None),
                initialized: AtomicBool::new(false),
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Whether the engine is loaded and serving operations.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Metrics registry shared with the engine.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Bus the service listens on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Enable the service, initializing now or once the host session starts.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error when the persisted document cannot be loaded.
    pub fn enable(&self) -> AppResult<()> {
        if self.is_initialized() {
            return Ok(());
        }
        self.inner.shutdown.send_replace(false);
        if self.inner.host.session_started() {
            let resume_after = self.inner.events.last_event_id().unwrap_or(0);
            return self.initialize(resume_after);
        }
        let mut stream = self.inner.events.subscribe(None);

        info!("host session not started; deferring label engine initialization");
        let service = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => break,
                    envelope = stream.next() => match envelope {
                        Some(envelope) if matches!(envelope.event, Event::SessionStarted) => {
                            if let Err(err) = service.initialize(envelope.id) {
                                warn!(error = %err, "deferred initialization failed");
                            }
                            break;
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        });
        self.inner.lock_tasks().push(handle);
        Ok(())
    }

    /// Load the engine and start the loops; the pump replays events after `resume_after`.
    fn initialize(&self, resume_after: EventId) -> AppResult<()> {
        let document = self
            .inner
            .store
            .load()
            .map_err(|err| AppError::config("config.load", err))?;
        let mut state = CoreState::new(
            document,
            Arc::clone(&self.inner.host),
            self.inner.metrics.clone(),
        );
        if let Err(err) = self.inner.persist(&mut state) {
            warn!(error = %err, "failed to save normalized label document");
        }
        self.inner
            .metrics
            .set_tree_size(state.label_count(), state.mappings().len());
        {
            let mut guard = self.inner.lock_state();
            if guard.is_some() {
                return Ok(());
            }
            if *self.inner.shutdown.borrow() {
                debug!("disabled while loading; dropping label engine");
                return Ok(());
            }
            *guard = Some(state);
            self.inner.initialized.store(true, Ordering::Release);
        }

        let handles = [
            self.spawn_event_pump(resume_after),
            self.spawn_shared_limit_loop(),
            self.spawn_persistence_loop(),
        ];
        self.inner.lock_tasks().extend(handles);
        info!("label engine initialized");
        Ok(())
    }

    /// Stop every loop, save the document and drop the engine.
    ///
    /// # Errors
    ///
    /// Returns an error when the final save fails; the engine is dropped regardless.
    pub async fn disable(&self) -> AppResult<()> {
        self.inner.shutdown.send_replace(true);
        {
            let _guard = self.inner.lock_state();
            self.inner.initialized.store(false, Ordering::Release);
        }

        let handles = std::mem::take(&mut *self.inner.lock_tasks());
        for mut handle in handles {
            match timeout(TASK_JOIN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_cancelled() => {}
                Ok(Err(err)) => warn!(error = %err, "background task join failed"),
                Err(_) => {
                    warn!("background task did not stop in time; aborting");
                    handle.abort();
                }
            }
        }

        let state = self.inner.lock_state().take();
        let result = match state {
            Some(mut state) => self.inner.persist(&mut state),
            None => Ok(()),
        };
        info!("label engine disabled");
        result
    }

    /// Run `f` against the engine, refreshing tree metrics afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CoreNotInitialized`] before initialization, or
    /// whatever `f` returns.
    pub fn with_state<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut CoreState) -> CoreResult<T>,
    ) -> AppResult<T> {
        self.try_with_state(operation, |state| {
            f(state).map_err(|err| AppError::core(operation, err))
        })
    }

    /// Like [`Self::with_state`] for closures that fail with [`AppError`].
    ///
    /// Lets a caller read, merge and write under one lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CoreNotInitialized`] before initialization, or
    /// whatever `f` returns.
    pub fn try_with_state<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut CoreState) -> AppResult<T>,
    ) -> AppResult<T> {
        let mut guard = self.inner.lock_state();
        let state = guard
            .as_mut()
            .ok_or_else(|| AppError::core(operation, CoreError::CoreNotInitialized))?;
        let result = f(state);
        self.inner
            .metrics
            .set_tree_size(state.label_count(), state.mappings().len());
        result
    }

    /// Save the document now.
    ///
    /// # Errors
    ///
    /// Returns an error before initialization or when the store fails.
    pub fn save(&self) -> AppResult<()> {
        let mut guard = self.inner.lock_state();
        let state = guard
            .as_mut()
            .ok_or_else(|| AppError::core("save", CoreError::CoreNotInitialized))?;
        self.inner.persist(state)
    }

    /// Save only when something changed since the last save; returns whether it saved.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub fn save_if_changed(&self) -> AppResult<bool> {
        let mut guard = self.inner.lock_state();
        match guard.as_mut() {
            Some(state) if state.timestamps().needs_save() => {
                self.inner.persist(state)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Poll for label updates, retrying with backoff while the engine is not ready.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::MaxRetriesExceeded`] when every attempt failed with a
    /// retryable error, [`AppError::TimedOut`] when the deadline passed first,
    /// or the first non-retryable error.
    pub async fn poll_label_updates_with_retry(
        &self,
        since: Option<DateTime<Utc>>,
        policy: RetryPolicy,
    ) -> AppResult<Option<LabelUpdate>> {
        const OPERATION: &str = "get_label_updates";
        let max_attempts = policy.max_attempts.max(1);
        let attempts = async {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.with_state(OPERATION, |state| Ok(state.label_updates(since))) {
                    Err(err) if err.is_retryable() => {
                        if attempt >= max_attempts {
                            return Err(AppError::MaxRetriesExceeded {
                                operation: OPERATION,
                                attempts: attempt,
                            });
                        }
                        let delay = policy.backoff(attempt - 1);
                        debug!(
                            attempt,
                            delay_ms = delay.as_millis(),
                            "label engine not ready; retrying"
                        );
                        sleep(delay).await;
                    }
                    result => return result,
                }
            }
        };
        timeout(policy.deadline, attempts)
            .await
            .map_err(|_| AppError::TimedOut {
                operation: OPERATION,
            })?
    }

    fn handle_event(&self, event: &Event) {
        let outcome = match event {
            Event::TorrentAdded { torrent_id } => self.with_state("torrent_added", |state| {
                let label_id = state.on_torrent_added(torrent_id);
                debug!(torrent_id = %torrent_id, label_id = %label_id, "torrent added");
                Ok(())
            }),
            Event::TorrentRemoved { torrent_id } => self.with_state("torrent_removed", |state| {
                state.on_torrent_removed(torrent_id);
                Ok(())
            }),
            Event::TorrentFinished { torrent_id } => self.with_state("torrent_finished", |state| {
                state.on_torrent_finished(torrent_id);
                Ok(())
            }),
            Event::SessionStarted => Ok(()),
        };
        if let Err(err) = outcome {
            warn!(
                error = %err,
                event = event.kind(),
                torrent_id = ?event.torrent_id(),
                "failed to handle host event"
            );
        }
    }

    fn spawn_event_pump(&self, resume_after: EventId) -> JoinHandle<()> {
        let service = self.clone();
        let mut stream = self.inner.events.subscribe(Some(resume_after));
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            while service.is_initialized() {
                tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => break,
                    envelope = stream.next() => match envelope {
                        Some(envelope) => service.handle_event(&envelope.event),
                        None => break,
                    },
                }
            }
            debug!("event pump stopped");
        })
    }

    fn spawn_shared_limit_loop(&self) -> JoinHandle<()> {
        let service = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            while service.is_initialized() {
                let cycle = service.with_state("update_shared_limits", |state| {
                    let pushed = state.update_shared_limits();
                    trace!(pushed, "shared limit cycle finished");
                    Ok(state.preferences().options.shared_limit_interval)
                });
                let Ok(interval) = cycle else {
                    break;
                };
                tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => break,
                    () = sleep(Duration::from_secs(interval)) => {}
                }
            }
            debug!("shared limit loop stopped");
        })
    }

    fn spawn_persistence_loop(&self) -> JoinHandle<()> {
        let service = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        let period = self.inner.save_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => break,
                    () = sleep(period) => {}
                }
                if !service.is_initialized() {
                    break;
                }
                if let Err(err) = service.save_if_changed() {
                    warn!(error = %err, "periodic save failed");
                }
            }
            debug!("persistence loop stopped");
        })
    }
}
