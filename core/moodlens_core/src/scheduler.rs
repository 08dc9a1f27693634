//! Debounced entry point and the auto-filter ticker.
//!
//! Every trigger path (tick, manual message, preference change) goes through one
//! `Debouncer`. The first trigger arms the window; triggers that land inside it only
//! replace the pending arguments. When the window closes, one run happens with the
//! latest arguments.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Something that performs one filter pass with the given selected moods.
#[async_trait]
pub trait FilterRun: Send + Sync {
    async fn run(&self, moods: Vec<String>);
}

/// Current mood selection, re-read on every tick.
#[async_trait]
pub trait MoodsProvider: Send + Sync {
    async fn selected_moods(&self) -> Vec<String>;
}

#[derive(Default)]
struct DebounceSlot {
    pending: Option<Vec<String>>,
    timer: Option<JoinHandle<()>>,
}

pub struct Debouncer {
    window: Duration,
    target: Arc<dyn FilterRun>,
    slot: Arc<Mutex<DebounceSlot>>,
}

impl Debouncer {
    pub fn new(window: Duration, target: Arc<dyn FilterRun>) -> Self {
        Self {
            window,
            target,
            slot: Arc::new(Mutex::new(DebounceSlot::default())),
        }
    }

    pub async fn trigger(&self, moods: Vec<String>) {
        let mut slot = self.slot.lock().await;
        slot.pending = Some(moods);
        if slot.timer.is_some() {
            debug!("trigger coalesced into pending run");
            return;
        }

        let shared = Arc::clone(&self.slot);
        let target = Arc::clone(&self.target);
        let window = self.window;
        slot.timer = Some(tokio::spawn(async move {
            sleep(window).await;
            let moods = {
                let mut slot = shared.lock().await;
                // Release the slot before running so triggers during the run arm a new window.
                slot.timer = None;
                slot.pending.take()
            };
            if let Some(moods) = moods {
                target.run(moods).await;
            }
        }));
    }

    /// Drops a pending run that has not fired yet.
    pub async fn cancel(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.pending = None;
    }
}

/// STOPPED / RUNNING state machine around a single periodic ticker.
pub struct AutoFilter {
    period: Duration,
    debouncer: Arc<Debouncer>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl AutoFilter {
    pub fn new(period: Duration, debouncer: Arc<Debouncer>) -> Self {
        Self {
            period,
            debouncer,
            ticker: Mutex::new(None),
        }
    }

    pub fn debouncer(&self) -> &Arc<Debouncer> {
        &self.debouncer
    }

    /// Starts ticking, replacing any ticker that is already running.
    pub async fn enable(&self, moods: Arc<dyn MoodsProvider>) {
        let mut ticker = self.ticker.lock().await;
        if let Some(prev) = ticker.take() {
            prev.abort();
            debug!("auto-filter ticker replaced");
        } else {
            info!("Auto-filter activated.");
        }

        let debouncer = Arc::clone(&self.debouncer);
        let period = self.period;
        *ticker = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let selected = moods.selected_moods().await;
                debouncer.trigger(selected).await;
            }
        }));
    }

    /// No-op when already stopped.
    pub async fn disable(&self) {
        if let Some(prev) = self.ticker.lock().await.take() {
            prev.abort();
            info!("Auto-filter stopped.");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.ticker.lock().await.is_some()
    }
}
