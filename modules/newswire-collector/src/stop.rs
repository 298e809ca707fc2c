//! Global stop switch.
//!
//! A single operator-controlled flag that suspends collection entirely.
//! Reads fail open: if the settings store is unreachable the pipeline
//! keeps running, with a loud log so the degraded state is visible.

use std::sync::Arc;

use tracing::{error, info};

use newswire_store::{SettingsStore, StoreError};

const STOP_KEY: &str = "global_stop";

pub struct StopController {
    settings: Arc<dyn SettingsStore>,
}

impl StopController {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    /// Whether collection is currently suspended. Store failures and an
    /// absent flag both mean "not stopped".
    pub async fn is_stopped(&self) -> bool {
        match self.settings.get(STOP_KEY).await {
            Ok(Some(value)) => value == "1",
            Ok(None) => false,
            Err(e) => {
                error!(error = %e, "Stop flag unreadable, continuing as not stopped");
                false
            }
        }
    }

    pub async fn set_stopped(&self, stopped: bool) -> Result<(), StoreError> {
        let value = if stopped { "1" } else { "0" };
        self.settings.set(STOP_KEY, value).await?;
        info!(stopped, "Global stop flag updated");
        Ok(())
    }

    /// Flip the flag, returning the new state.
    pub async fn toggle(&self) -> Result<bool, StoreError> {
        let next = !self.is_stopped().await;
        self.set_stopped(next).await?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newswire_store::MemoryStore;

    fn controller() -> (StopController, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (StopController::new(store.clone()), store)
    }

    #[tokio::test]
    async fn absent_flag_means_running() {
        let (ctl, _) = controller();
        assert!(!ctl.is_stopped().await);
    }

    #[tokio::test]
    async fn set_and_clear_round_trip() {
        let (ctl, _) = controller();
        ctl.set_stopped(true).await.unwrap();
        assert!(ctl.is_stopped().await);
        ctl.set_stopped(false).await.unwrap();
        assert!(!ctl.is_stopped().await);
    }

    #[tokio::test]
    async fn toggle_flips_state() {
        let (ctl, _) = controller();
        assert!(ctl.toggle().await.unwrap());
        assert!(ctl.is_stopped().await);
        assert!(!ctl.toggle().await.unwrap());
        assert!(!ctl.is_stopped().await);
    }

    #[tokio::test]
    async fn store_outage_fails_open() {
        let (ctl, store) = controller();
        store.set_unavailable(true);
        assert!(!ctl.is_stopped().await);
    }

    #[tokio::test]
    async fn unexpected_value_means_running() {
        let (ctl, store) = controller();
        store.set(STOP_KEY, "yes").await.unwrap();
        assert!(!ctl.is_stopped().await);
    }
}
