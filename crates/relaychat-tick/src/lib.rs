//! Fixed-period ticker for relaychat's periodic broadcasts.
//!
//! The proxy pushes the merged name table on a steady cadence (every 5 s
//! by default, i.e. 100 game ticks). [`BroadcastTicker`] owns that cadence:
//! first-tick jitter so several proxies started together do not broadcast
//! in lockstep, an overrun policy, pause/resume, and run metrics.
//!
//! Most callers want [`spawn_periodic`], which drives a ticker on its own
//! task and hands each tick to a callback:
//!
//! ```ignore
//! let task = spawn_periodic(TickConfig::default(), move |_tick| {
//!     manager.update_all_names();
//! });
//! // ...
//! let metrics = task.stop().await;
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when a tick fires late.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickPolicy {
    /// Count the missed ticks and schedule the next one a full period from now.
    #[default]
    Skip,
    /// Fire up to `max_catchup` missed ticks back to back, then fall back to
    /// skipping.
    CatchUp { max_catchup: u32 },
    /// Keep the original schedule; missed deadlines fire immediately.
    Drop,
}

/// Ticker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Time between ticks.
    pub period: Duration,
    /// Overrun handling.
    pub policy: TickPolicy,
    /// Upper bound of the random delay added to the first tick.
    pub initial_jitter: Duration,
    /// Fraction of the period a tick callback may take before a warning is
    /// logged.
    pub busy_warn_threshold: f64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5),
            policy: TickPolicy::default(),
            initial_jitter: Duration::from_millis(250),
            busy_warn_threshold: 0.5,
        }
    }
}

impl TickConfig {
    pub const MIN_PERIOD: Duration = Duration::from_millis(10);

    pub fn with_period(period: Duration) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    /// Same config with no first-tick jitter. Handy in tests.
    pub fn without_jitter(self) -> Self {
        Self {
            initial_jitter: Duration::ZERO,
            ..self
        }
    }

    /// Clamps out-of-range values. Called by [`BroadcastTicker::new`].
    pub fn validated(mut self) -> Self {
        if self.period < Self::MIN_PERIOD {
            warn!(
                period_ms = self.period.as_millis() as u64,
                min_ms = Self::MIN_PERIOD.as_millis() as u64,
                "tick period below minimum, clamping"
            );
            self.period = Self::MIN_PERIOD;
        }
        if self.initial_jitter > self.period {
            self.initial_jitter = self.period;
        }
        self.busy_warn_threshold = self.busy_warn_threshold.clamp(0.0, 1.0);
        self
    }
}

// ---------------------------------------------------------------------------
// Tick info and metrics
// ---------------------------------------------------------------------------

/// One fired tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickInfo {
    /// Starts at 1.
    pub tick: u64,
    /// Whether the tick woke more than a tenth of a period late.
    pub overrun: bool,
    /// Ticks dropped because of the overrun.
    pub ticks_skipped: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    /// Longest time a tick callback ran.
    pub max_busy: Duration,
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

/// Fixed-period ticker. Drive it with [`wait_for_tick`](Self::wait_for_tick).
pub struct BroadcastTicker {
    config: TickConfig,
    tick_count: u64,
    next_tick: Instant,
    tick_start: Option<Instant>,
    paused: bool,
    metrics: TickMetrics,
}

impl BroadcastTicker {
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();

        let max_jitter_us = config.initial_jitter.as_micros() as u64;
        let jitter = if max_jitter_us == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(rand::rng().random_range(0..max_jitter_us))
        };
        let next_tick = Instant::now() + config.period + jitter;

        debug!(
            period_ms = config.period.as_millis() as u64,
            jitter_us = jitter.as_micros() as u64,
            policy = ?config.policy,
            "broadcast ticker created"
        );

        Self {
            config,
            tick_count: 0,
            next_tick,
            tick_start: None,
            paused: false,
            metrics: TickMetrics::default(),
        }
    }

    /// Waits for the next tick. Pends forever while paused.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        if self.paused {
            std::future::pending::<()>().await;
        }
        let due = self.next_tick;
        let period = self.config.period;

        time::sleep_until(due).await;

        let now = Instant::now();
        self.tick_count += 1;
        self.tick_start = Some(now);

        let late_by = now.saturating_duration_since(due);
        let overrun = late_by > period / 10;
        let behind = (late_by.as_nanos() / period.as_nanos()) as u64;
        let mut ticks_skipped = 0;

        self.next_tick = match self.config.policy {
            TickPolicy::Skip => {
                ticks_skipped = behind;
                if ticks_skipped > 0 {
                    warn!(
                        tick = self.tick_count,
                        skipped = ticks_skipped,
                        late_ms = late_by.as_millis() as u64,
                        "broadcast tick late, skipping ahead"
                    );
                }
                now + period
            }
            TickPolicy::CatchUp { max_catchup } => {
                if behind <= u64::from(max_catchup) {
                    due + period
                } else {
                    ticks_skipped = behind - u64::from(max_catchup);
                    warn!(
                        tick = self.tick_count,
                        behind,
                        skipped = ticks_skipped,
                        "broadcast tick far behind, catch-up capped at {max_catchup}"
                    );
                    now + period
                }
            }
            TickPolicy::Drop => due + period,
        };

        if overrun {
            self.metrics.total_overruns += 1;
        }
        self.metrics.total_skipped += ticks_skipped;
        self.metrics.total_ticks += 1;

        trace!(tick = self.tick_count, overrun, "broadcast tick fired");

        TickInfo {
            tick: self.tick_count,
            overrun,
            ticks_skipped,
        }
    }

    /// Marks the end of the work done for the current tick.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let busy = start.elapsed();
        if busy > self.metrics.max_busy {
            self.metrics.max_busy = busy;
        }
        let share = busy.as_secs_f64() / self.config.period.as_secs_f64();
        if share >= self.config.busy_warn_threshold {
            warn!(
                tick = self.tick_count,
                busy_ms = busy.as_millis() as u64,
                period_ms = self.config.period.as_millis() as u64,
                "broadcast tick callback is slow"
            );
        }
    }

    /// Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick_count, "broadcast ticker paused");
        }
    }

    /// Next tick is a full period after the resume, never a burst.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.next_tick = Instant::now() + self.config.period;
            debug!(tick = self.tick_count, "broadcast ticker resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn period(&self) -> Duration {
        self.config.period
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }
}

// ---------------------------------------------------------------------------
// Background driver
// ---------------------------------------------------------------------------

enum Control {
    Pause,
    Resume,
    Stop,
}

/// A ticker running on its own task. Dropping it stops the task.
pub struct PeriodicTask {
    control: mpsc::UnboundedSender<Control>,
    join: JoinHandle<TickMetrics>,
}

impl PeriodicTask {
    pub fn pause(&self) {
        let _ = self.control.send(Control::Pause);
    }

    pub fn resume(&self) {
        let _ = self.control.send(Control::Resume);
    }

    /// Stops the task after the tick in progress, if any, and returns the
    /// final metrics.
    pub async fn stop(self) -> TickMetrics {
        let _ = self.control.send(Control::Stop);
        self.join.await.unwrap_or_default()
    }
}

/// Runs `on_tick` once per tick on a spawned task. Must be called inside a
/// Tokio runtime.
pub fn spawn_periodic<F>(config: TickConfig, mut on_tick: F) -> PeriodicTask
where
    F: FnMut(TickInfo) + Send + 'static,
{
    let (control, mut rx) = mpsc::unbounded_channel();
    let mut ticker = BroadcastTicker::new(config);

    let join = tokio::spawn(async move {
        enum Event {
            Control(Option<Control>),
            Tick(TickInfo),
        }

        loop {
            let event = tokio::select! {
                cmd = rx.recv() => Event::Control(cmd),
                info = ticker.wait_for_tick() => Event::Tick(info),
            };
            match event {
                Event::Tick(info) => {
                    on_tick(info);
                    ticker.record_tick_end();
                }
                Event::Control(Some(Control::Pause)) => ticker.pause(),
                Event::Control(Some(Control::Resume)) => ticker.resume(),
                Event::Control(Some(Control::Stop) | None) => break,
            }
        }
        debug!(ticks = ticker.tick_count(), "broadcast ticker stopped");
        ticker.metrics().clone()
    });

    PeriodicTask { control, join }
}
