//! Periodic sweeps
//!
//! Two independent background jobs walk the full wallet key space:
//! the tax sweep (24h) applies any pending bank tax eagerly, and the effect
//! sweep (5min) expires temporary display effects. Errors on an individual
//! wallet are logged and skipped; a sweep always finishes the remaining
//! wallets.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crumb_storage::{KvStore, LedgerStore};
use crumb_types::unix_now;

use crate::platform::PlatformConnector;

/// Result of one tax sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaxSweepReport {
    pub scanned: usize,
    /// Wallets whose bank balance actually decayed
    pub taxed: usize,
    pub total_loss: u64,
    pub errors: usize,
}

/// Result of one effect-expiry sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectSweepReport {
    pub scanned: usize,
    /// Effects found expired and cleared
    pub expired: usize,
    /// Display markers successfully reverted (always <= expired)
    pub reverted: usize,
    pub errors: usize,
}

/// Apply pending tax accrual to every wallet. Uses the same accrual path as
/// lazy loads, so a wallet that was just loaded is simply skipped as
/// unchanged. Only changed wallets are persisted (inside `accrue_at`).
pub fn run_tax_sweep<K: KvStore>(store: &LedgerStore<K>, now: u64) -> TaxSweepReport {
    info!("Starting bank tax sweep");
    let mut report = TaxSweepReport::default();

    let users = match store.user_ids() {
        Ok(users) => users,
        Err(e) => {
            warn!(error = %e, "Tax sweep could not enumerate wallets");
            report.errors += 1;
            return report;
        }
    };

    for user in users {
        report.scanned += 1;
        match store.accrue_at(&user, now) {
            Ok((_, accrual)) => {
                if accrual.loss > 0 {
                    report.taxed += 1;
                    report.total_loss += accrual.loss;
                }
            }
            Err(e) => {
                // One bad wallet must not starve the rest
                report.errors += 1;
                warn!(user = %user, error = %e, "Skipping wallet in tax sweep");
            }
        }
    }

    info!(
        scanned = report.scanned,
        taxed = report.taxed,
        total_loss = report.total_loss,
        errors = report.errors,
        "Finished bank tax sweep"
    );
    report
}

/// Clear expired temporary effects. The display-marker revert is best-effort:
/// a refused revert is logged, but the effect fields are cleared regardless
/// so the ledger never carries a dead effect.
pub async fn run_effect_sweep<K: KvStore>(
    store: &LedgerStore<K>,
    platform: &dyn PlatformConnector,
    now: u64,
) -> EffectSweepReport {
    let mut report = EffectSweepReport::default();

    let users = match store.user_ids() {
        Ok(users) => users,
        Err(e) => {
            warn!(error = %e, "Effect sweep could not enumerate wallets");
            report.errors += 1;
            return report;
        }
    };

    for user in users {
        report.scanned += 1;
        let mut wallet = match store.load_at(&user, now) {
            Ok(wallet) => wallet,
            Err(e) => {
                report.errors += 1;
                warn!(user = %user, error = %e, "Skipping wallet in effect sweep");
                continue;
            }
        };

        let expired = matches!(&wallet.effect, Some(effect) if effect.expires_at <= now);
        if !expired {
            continue;
        }
        report.expired += 1;

        match platform.set_display_marker(&user, None).await {
            Ok(()) => report.reverted += 1,
            Err(e) => {
                warn!(user = %user, error = %e, "Could not revert display marker");
            }
        }

        // Guaranteed state cleanup, whether or not the revert landed
        wallet.effect = None;
        if let Err(e) = store.save(&user, &wallet) {
            report.errors += 1;
            warn!(user = %user, error = %e, "Could not persist cleared effect");
        }
    }

    if report.expired > 0 || report.errors > 0 {
        info!(
            scanned = report.scanned,
            expired = report.expired,
            reverted = report.reverted,
            errors = report.errors,
            "Finished effect sweep"
        );
    }
    report
}

/// Sweep intervals. Defaults: tax every 24h, effects every 5min.
#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    pub tax_interval: Duration,
    pub effect_interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            tax_interval: Duration::from_secs(86_400),
            effect_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Owns the two sweep timers. Construct with `new`, hold on to the returned
/// shutdown handle, and spawn `run` on the runtime.
pub struct Sweeper<K: KvStore> {
    store: Arc<LedgerStore<K>>,
    platform: Arc<dyn PlatformConnector>,
    config: SweepConfig,
    shutdown_rx: oneshot::Receiver<()>,
}

impl<K: KvStore> Sweeper<K> {
    pub fn new(
        store: Arc<LedgerStore<K>>,
        platform: Arc<dyn PlatformConnector>,
        config: SweepConfig,
    ) -> (Self, oneshot::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        (
            Self {
                store,
                platform,
                config,
                shutdown_rx,
            },
            shutdown_tx,
        )
    }

    /// Run both sweep timers until the shutdown handle fires or drops
    pub async fn run(mut self) {
        let mut tax_ticker = tokio::time::interval(self.config.tax_interval);
        tax_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut effect_ticker = tokio::time::interval(self.config.effect_interval);
        effect_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            tax_interval_secs = self.config.tax_interval.as_secs(),
            effect_interval_secs = self.config.effect_interval.as_secs(),
            "Sweep loop started"
        );

        loop {
            tokio::select! {
                _ = tax_ticker.tick() => {
                    run_tax_sweep(self.store.as_ref(), unix_now());
                }
                _ = effect_ticker.tick() => {
                    run_effect_sweep(self.store.as_ref(), self.platform.as_ref(), unix_now()).await;
                }
                _ = &mut self.shutdown_rx => {
                    info!("Sweep loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockPlatform;
    use crumb_storage::MemoryKvStore;
    use crumb_types::{ActiveEffect, Catalog, CurrencyKind, TaxPolicy, UserId, Wallet};

    const DAY: u64 = 86_400;

    fn test_store() -> Arc<LedgerStore<MemoryKvStore>> {
        Arc::new(LedgerStore::new(
            MemoryKvStore::new(),
            Arc::new(Catalog::default()),
            TaxPolicy::default(),
        ))
    }

    fn seed_wallet(store: &LedgerStore<MemoryKvStore>, id: u64, bank: u64, last_taxed: u64) -> UserId {
        let user = UserId::from(id);
        let mut wallet = Wallet::new_at(last_taxed);
        wallet.credit_bank(bank).unwrap();
        store.save(&user, &wallet).unwrap();
        user
    }

    #[test]
    fn test_tax_sweep_taxes_due_wallets_only() {
        let store = test_store();
        let due = seed_wallet(&store, 1, 1000, 0);
        let fresh = seed_wallet(&store, 2, 1000, 2 * DAY - 100);
        let empty = seed_wallet(&store, 3, 0, 0);

        let report = run_tax_sweep(store.as_ref(), 2 * DAY);
        assert_eq!(report.scanned, 3);
        assert_eq!(report.taxed, 1);
        assert_eq!(report.errors, 0);

        // Two whole periods on the due wallet
        let expected = 1000 * 97 / 100 * 97 / 100;
        assert_eq!(store.load_at(&due, 2 * DAY).unwrap().bank, expected);
        assert_eq!(report.total_loss, 1000 - expected);

        // Under one period: untouched
        assert_eq!(store.load_at(&fresh, 2 * DAY).unwrap().bank, 1000);

        // Zero bank: nothing lost
        assert_eq!(store.load_at(&empty, 2 * DAY).unwrap().bank, 0);
    }

    #[test]
    fn test_tax_sweep_is_idempotent() {
        let store = test_store();
        seed_wallet(&store, 1, 500, 0);

        let first = run_tax_sweep(store.as_ref(), DAY);
        assert_eq!(first.taxed, 1);

        // Same instant again: no further decay
        let second = run_tax_sweep(store.as_ref(), DAY);
        assert_eq!(second.taxed, 0);
        assert_eq!(second.total_loss, 0);
    }

    #[test]
    fn test_tax_sweep_survives_corrupt_record() {
        use crumb_storage::KvStore;

        let kv = Arc::new(MemoryKvStore::new());
        let store = LedgerStore::new(
            kv.clone(),
            Arc::new(Catalog::default()),
            TaxPolicy::default(),
        );

        let healthy = UserId::from(1u64);
        let mut wallet = Wallet::new_at(0);
        wallet.credit_bank(1000).unwrap();
        store.save(&healthy, &wallet).unwrap();

        // A wallet-keyed record that is not a wallet at all
        kv.set("2", b"not json at all".to_vec()).unwrap();

        let report = run_tax_sweep(&store, 3 * DAY);

        // Both records were scanned; the corrupt one self-healed instead of
        // aborting the sweep, and the healthy one was still taxed
        assert_eq!(report.scanned, 2);
        assert_eq!(report.errors, 0);
        assert_eq!(report.taxed, 1);
        assert_eq!(store.load_at(&UserId::from(2u64), 3 * DAY).unwrap().bank, 0);
    }

    #[tokio::test]
    async fn test_effect_sweep_clears_expired() {
        let store = test_store();
        let platform = MockPlatform::new();
        let user = UserId::from(1u64);

        platform.set_display_marker(&user, Some("☕")).await.unwrap();
        let mut wallet = Wallet::new_at(0);
        wallet.effect = Some(ActiveEffect {
            kind: CurrencyKind::new("coffee"),
            expires_at: 100,
        });
        store.save(&user, &wallet).unwrap();

        let report = run_effect_sweep(store.as_ref(), &platform, 100).await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.reverted, 1);

        assert!(store.load_at(&user, 100).unwrap().effect.is_none());
        assert!(platform.marker_of(&user).is_none());
    }

    #[tokio::test]
    async fn test_effect_sweep_leaves_active_effects() {
        let store = test_store();
        let platform = MockPlatform::new();
        let user = UserId::from(1u64);

        let mut wallet = Wallet::new_at(0);
        wallet.effect = Some(ActiveEffect {
            kind: CurrencyKind::new("milk"),
            expires_at: 1000,
        });
        store.save(&user, &wallet).unwrap();

        let report = run_effect_sweep(store.as_ref(), &platform, 999).await;
        assert_eq!(report.expired, 0);
        assert!(store.load_at(&user, 999).unwrap().effect.is_some());
    }

    #[tokio::test]
    async fn test_effect_sweep_clears_even_when_revert_refused() {
        let store = test_store();
        let platform = MockPlatform::new();
        platform.deny_markers(true);
        let user = UserId::from(1u64);

        let mut wallet = Wallet::new_at(0);
        wallet.effect = Some(ActiveEffect {
            kind: CurrencyKind::new("matcha"),
            expires_at: 50,
        });
        store.save(&user, &wallet).unwrap();

        let report = run_effect_sweep(store.as_ref(), &platform, 60).await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.reverted, 0);

        // State cleanup is unconditional
        assert!(store.load_at(&user, 60).unwrap().effect.is_none());
    }

    #[tokio::test]
    async fn test_sweeper_shutdown() {
        let store = test_store();
        let platform: Arc<dyn PlatformConnector> = Arc::new(MockPlatform::new());
        let config = SweepConfig {
            tax_interval: Duration::from_millis(10),
            effect_interval: Duration::from_millis(10),
        };

        let (sweeper, shutdown) = Sweeper::new(store, platform, config);
        let handle = tokio::spawn(sweeper.run());

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.send(()).unwrap();
        handle.await.unwrap();
    }
}
