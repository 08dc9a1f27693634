//! Inbound trigger messages and preference-change handling.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::prefs::PreferenceStore;
use crate::scheduler::AutoFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "action")]
pub enum TriggerMessage {
    #[serde(rename = "runFilter")]
    RunFilter,
    #[serde(rename = "updateAutoFilter")]
    UpdateAutoFilter,
}

pub struct Controller {
    prefs: Arc<PreferenceStore>,
    auto_filter: AutoFilter,
}

impl Controller {
    pub fn new(prefs: Arc<PreferenceStore>, auto_filter: AutoFilter) -> Self {
        Self { prefs, auto_filter }
    }

    pub fn prefs(&self) -> &Arc<PreferenceStore> {
        &self.prefs
    }

    pub async fn handle(&self, msg: TriggerMessage) {
        debug!("message: {msg:?}");
        match msg {
            TriggerMessage::RunFilter => {
                let moods = self.prefs.get().await.moods;
                self.auto_filter.debouncer().trigger(moods).await;
            }
            TriggerMessage::UpdateAutoFilter => {
                self.sync_auto_filter().await;
            }
        }
    }

    /// Starts or stops the ticker to match the stored `autoFilter` flag.
    pub async fn sync_auto_filter(&self) -> bool {
        let enabled = self.prefs.get().await.auto_filter;
        if enabled {
            self.auto_filter.enable(self.prefs.clone()).await;
        } else {
            self.auto_filter.disable().await;
        }
        enabled
    }

    pub async fn auto_filter_running(&self) -> bool {
        self.auto_filter.is_running().await
    }

    /// Stops the ticker and drops any run still waiting out its debounce window.
    pub async fn shutdown(&self) {
        self.auto_filter.disable().await;
        self.auto_filter.debouncer().cancel().await;
    }

    async fn on_preferences_changed(&self) {
        if self.sync_auto_filter().await {
            let moods = self.prefs.get().await.moods;
            self.auto_filter.debouncer().trigger(moods).await;
        }
    }

    /// Re-syncs the scheduler whenever the panel writes preferences.
    pub fn spawn_preference_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let mut rx = self.prefs.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                rx.borrow_and_update();
                controller.on_preferences_changed().await;
            }
            info!("preference watcher stopped");
        })
    }
}
