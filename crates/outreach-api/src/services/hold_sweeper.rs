//! Background service that force-releases expired credit holds.
//!
//! A caller that crashes or hangs between hold and commit would otherwise
//! leave a reservation that starves the user's balance. Each pass releases
//! holds older than the TTL without charging. With the default TTL of one
//! hour and interval of 30 minutes a hold is gone within 90 minutes.

use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::error::CreditError;
use crate::metrics;
use crate::services::holds::HoldManager;

pub struct HoldSweeper {
    holds: HoldManager,
    interval: Duration,
    enabled: bool,
}

impl HoldSweeper {
    pub fn new(holds: HoldManager, interval: Duration, enabled: bool) -> Self {
        Self {
            holds,
            interval,
            enabled,
        }
    }

    /// Start the sweep loop. Runs until the task is dropped.
    pub async fn run(&self) {
        if !self.enabled {
            info!("Hold sweep is disabled");
            return;
        }

        info!(
            "Starting hold sweeper (interval: {:?}, ttl: {:?})",
            self.interval,
            self.holds.ttl()
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.sweep_once().await {
                Ok(0) => {}
                Ok(count) => info!("Hold sweep released {} expired holds", count),
                Err(e) => error!("Hold sweep error: {}", e),
            }
        }
    }

    /// Run a single pass at the current time.
    pub async fn sweep_once(&self) -> Result<usize, CreditError> {
        let swept = self.holds.sweep_expired(Utc::now()).await?.len();
        let outstanding = self.holds.outstanding().await?;
        metrics::set_holds_outstanding(outstanding);
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use outreach_models::{Account, Credits, Hold, OperationKind};
    use outreach_store::{HoldStore, LedgerStore, MemoryHoldStore, MemoryLedger};

    #[tokio::test]
    async fn test_sweep_once_releases_only_expired() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger
            .create_account(Account::new_free("old", None, Credits::whole(7)))
            .await
            .unwrap();
        let store = Arc::new(MemoryHoldStore::new());

        let mut stale = Hold::new("old", Credits::whole(1), OperationKind::Scrape);
        stale.created_at = Utc::now() - chrono::Duration::seconds(3700);
        store.insert(stale).await.unwrap();
        store
            .insert(Hold::new("fresh", Credits::whole(1), OperationKind::Message))
            .await
            .unwrap();

        let holds = HoldManager::new(store.clone(), ledger, Duration::from_secs(3600));
        let sweeper = HoldSweeper::new(holds, Duration::from_secs(1800), true);

        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.get("fresh").await.unwrap().is_some());
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }
}
