// Try-primary-else-secondary composition of two settings stores.
//
// The stop flag is stored redundantly: a fast process-local store answers
// most reads, the durable store survives restarts and outages. Reads fall
// through on primary error or miss; writes attempt both and succeed if
// either store took the value.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{Result, StoreError};
use crate::traits::SettingsStore;

pub struct FallbackSettings {
    primary: Arc<dyn SettingsStore>,
    secondary: Arc<dyn SettingsStore>,
}

impl FallbackSettings {
    pub fn new(primary: Arc<dyn SettingsStore>, secondary: Arc<dyn SettingsStore>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl SettingsStore for FallbackSettings {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.primary.get(key).await {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "Primary settings store read failed, falling back"),
        }

        match self.secondary.get(key).await {
            Ok(value) => {
                // Backfill the fast store so the next read stays local.
                if let Some(ref v) = value {
                    let _ = self.primary.set(key, v).await;
                }
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let primary = self.primary.set(key, value).await;
        let secondary = self.secondary.set(key, value).await;

        // A write that lands in only one store is not rolled back; eventual
        // consistency between the two is acceptable for this control.
        match (primary, secondary) {
            (Err(p), Err(s)) => {
                warn!(key, primary = %p, secondary = %s, "Both settings stores rejected write");
                Err(StoreError::Unavailable(
                    "both settings stores rejected write".into(),
                ))
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => {
                warn!(key, error = %e, "Settings write landed in only one store");
                Ok(())
            }
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}
