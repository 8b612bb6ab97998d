mod error;

pub use self::error::{CycleError, SchedulerError};

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{Config, ConfigurationError};
use crate::export::health::HealthMetrics;
use crate::export::Publish;
use crate::normalize::normalize;
use crate::source::SampleSource;
use crate::storage::{flush_cutoff, WindowStore};

/// Lifecycle of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Constructed, cadences not started.
    Idle,
    /// Both cadences active.
    Running,
    /// Cadences cancelled. Terminal.
    Stopped,
}

/// The two repeating tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Collect,
    Flush,
}

impl Cadence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Collect => "collect",
            Self::Flush => "flush",
        }
    }
}

/// Timing and behavior knobs for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub collect_frequency: Duration,
    pub send_frequency: Duration,
    pub suppress_not_found: bool,
    pub stop_timeout: Duration,
}

impl SchedulerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            enabled: cfg.enabled,
            collect_frequency: cfg.collect_frequency,
            send_frequency: cfg.send_frequency,
            suppress_not_found: cfg.suppress_not_found,
            stop_timeout: cfg.stop_timeout,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// State shared by both cadence tasks.
struct Inner<S, P> {
    settings: SchedulerSettings,
    store: WindowStore,
    source: S,
    publisher: P,
    health: Option<Arc<HealthMetrics>>,
}

/// Drives the collect and flush cadences over one shared window store.
///
/// The host constructs one scheduler, calls [`run`](Self::run) once, and
/// calls [`stop`](Self::stop) on shutdown. Each process running a scheduler
/// keeps its own store; nothing is aggregated across processes.
pub struct Scheduler<S, P> {
    inner: Arc<Inner<S, P>>,
    state: SchedulerState,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<S, P> Scheduler<S, P>
where
    S: SampleSource + 'static,
    P: Publish + 'static,
{
    /// Creates an idle scheduler with an empty store whose window size is the
    /// send frequency.
    pub fn new(settings: SchedulerSettings, source: S, publisher: P) -> Self {
        Self::with_health(settings, source, publisher, None)
    }

    /// Like [`new`](Self::new), reporting iteration outcomes to `health`.
    pub fn with_health(
        settings: SchedulerSettings,
        source: S,
        publisher: P,
        health: Option<Arc<HealthMetrics>>,
    ) -> Self {
        let store = WindowStore::new(settings.send_frequency);
        Self {
            inner: Arc::new(Inner {
                settings,
                store,
                source,
                publisher,
                health,
            }),
            state: SchedulerState::Idle,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// The shared window store.
    pub fn store(&self) -> &WindowStore {
        &self.inner.store
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    pub fn publisher(&self) -> &P {
        &self.inner.publisher
    }

    /// Starts both cadences on the current tokio runtime.
    ///
    /// Does nothing when telemetry is disabled or the scheduler is already
    /// running. Fails when enabled without a configured control endpoint, or
    /// after [`stop`](Self::stop).
    pub fn run(&mut self) -> Result<(), SchedulerError> {
        match self.state {
            SchedulerState::Running => return Ok(()),
            SchedulerState::Stopped => return Err(SchedulerError::Stopped),
            SchedulerState::Idle => {}
        }

        if !self.inner.settings.enabled {
            debug!("telemetry disabled, scheduler stays idle");
            return Ok(());
        }

        if !self.inner.source.is_configured() {
            return Err(ConfigurationError::MissingControlUrl.into());
        }

        self.tasks.push(self.spawn_cadence(Cadence::Collect));
        self.tasks.push(self.spawn_cadence(Cadence::Flush));
        self.state = SchedulerState::Running;

        info!(
            collect_frequency = ?self.inner.settings.collect_frequency,
            send_frequency = ?self.inner.settings.send_frequency,
            publisher = self.inner.publisher.name(),
            "scheduler started",
        );

        Ok(())
    }

    /// Cancels both cadences, including any iteration in flight, and waits up
    /// to the configured stop timeout for them to exit. Idempotent.
    pub async fn stop(&mut self) {
        if self.state == SchedulerState::Stopped {
            return;
        }

        self.cancel.cancel();
        self.state = SchedulerState::Stopped;

        let timeout = self.inner.settings.stop_timeout;
        for handle in self.tasks.drain(..) {
            let abort = handle.abort_handle();
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => warn!(error = %e, "cadence task panicked"),
                Err(_) => {
                    warn!(?timeout, "cadence did not stop in time, aborting");
                    abort.abort();
                }
            }
        }

        info!(pending_windows = self.inner.store.len(), "scheduler stopped");
    }

    fn spawn_cadence(&self, cadence: Cadence) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        let period = match cadence {
            Cadence::Collect => inner.settings.collect_frequency,
            Cadence::Flush => inner.settings.send_frequency,
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(period) => {}
                }

                let iteration = async {
                    match cadence {
                        Cadence::Collect => inner.collect_once().await,
                        Cadence::Flush => inner.flush_once().await,
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = iteration => {
                        if let Err(e) = result {
                            inner.report(cadence, &e);
                        }
                    }
                }
            }
        })
    }
}

impl<S, P> Drop for Scheduler<S, P> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<S: SampleSource, P: Publish> Inner<S, P> {
    /// Fetch, normalize, aggregate. Returns the number of values recorded.
    async fn collect_once(&self) -> Result<usize, CycleError> {
        if let Some(h) = &self.health {
            h.collect_iterations.inc();
        }

        let start = Instant::now();
        let fetched = self.source.fetch().await;
        if let Some(h) = &self.health {
            h.fetch_duration.observe(start.elapsed().as_secs_f64());
        }

        let batch = normalize(&fetched?)?;
        let recorded = self.store.aggregate(&batch, SystemTime::now());

        if let Some(h) = &self.health {
            h.samples_aggregated.inc_by(recorded as f64);
            h.pending_windows.set(self.store.len() as f64);
        }

        trace!(recorded, "collected sample batch");

        Ok(recorded)
    }

    /// Extract completed windows and publish them. Returns the number of data
    /// points published.
    async fn flush_once(&self) -> Result<usize, CycleError> {
        if let Some(h) = &self.health {
            h.flush_iterations.inc();
        }

        let cutoff = flush_cutoff(SystemTime::now(), self.settings.send_frequency);
        let windows = self.store.extract(cutoff);

        if let Some(h) = &self.health {
            h.pending_windows.set(self.store.len() as f64);
        }

        if windows.is_empty() {
            return Ok(0);
        }

        let published = self.publisher.publish(&windows).await.map_err(|e| {
            if let Some(h) = &self.health {
                h.publish_errors.with_label_values(&[e.label()]).inc();
            }
            e
        })?;

        if let Some(h) = &self.health {
            h.windows_flushed.inc_by(windows.len() as f64);
            h.data_points_published.inc_by(published as f64);
        }

        debug!(
            windows = windows.len(),
            data_points = published,
            cutoff,
            "flushed windows",
        );

        Ok(published)
    }

    fn report(&self, cadence: Cadence, err: &CycleError) {
        if cadence == Cadence::Collect {
            if let Some(h) = &self.health {
                h.collect_errors.with_label_values(&[err.kind()]).inc();
            }
        }

        // The control socket appears only once the host process has booted.
        if self.settings.suppress_not_found && err.is_not_found() {
            trace!(cadence = cadence.as_str(), error = %err, "control socket not ready");
            return;
        }

        error!(
            cadence = cadence.as_str(),
            kind = err.kind(),
            "Pumawatch Error: {err} ({})",
            err.kind(),
        );
    }
}
