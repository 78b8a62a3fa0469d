//! Ledger store
//!
//! Typed wrapper over the raw key-value store. Owns wallet serialization,
//! default-wallet synthesis, schema repair, and lazy tax accrual, so that a
//! load never fails and never returns a stale or schema-incomplete wallet.
//!
//! Repair policy: a missing record is synthesized; a record missing newly
//! introduced fields or currency kinds is completed in place; a record that
//! does not parse at all is replaced with a fresh default wallet. That last
//! case loses the corrupt data on purpose - the store self-heals rather than
//! refusing service.

use std::sync::Arc;
use tracing::{debug, warn};

use crumb_types::{unix_now, Accrual, Catalog, CrumbResult, TaxPolicy, UserId, Wallet};

use crate::kv::KvStore;

/// Typed wallet storage over a raw key-value backend
pub struct LedgerStore<K: KvStore> {
    kv: K,
    catalog: Arc<Catalog>,
    tax: TaxPolicy,
}

impl<K: KvStore> LedgerStore<K> {
    pub fn new(kv: K, catalog: Arc<Catalog>, tax: TaxPolicy) -> Self {
        Self { kv, catalog, tax }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn tax_policy(&self) -> TaxPolicy {
        self.tax
    }

    /// Load a user's wallet, repairing and accruing as needed.
    /// Never fails on bad stored data, only on backend errors.
    pub fn load(&self, user: &UserId) -> CrumbResult<Wallet> {
        self.load_at(user, unix_now())
    }

    /// `load` with an explicit clock
    pub fn load_at(&self, user: &UserId, now: u64) -> CrumbResult<Wallet> {
        Ok(self.accrue_at(user, now)?.0)
    }

    /// Load a wallet and report the tax accrual that was applied.
    /// This is the single accrual path shared by lazy loads and the
    /// scheduled sweep, so the two can never disagree.
    pub fn accrue_at(&self, user: &UserId, now: u64) -> CrumbResult<(Wallet, Accrual)> {
        let (mut wallet, mut dirty) = self.fetch_or_default(user, now)?;

        // Schema repair: newly introduced currency kinds appear at zero
        if wallet.ensure_kinds(self.catalog.currency_kinds()) {
            dirty = true;
        }

        // Records that predate the tax clock start accruing from now
        if wallet.last_taxed == 0 {
            wallet.last_taxed = now;
            dirty = true;
        }

        let accrual = self.tax.accrue(wallet.bank, wallet.last_taxed, now);
        if accrual.changed() {
            wallet.bank = accrual.bank;
            wallet.last_taxed = accrual.last_taxed;
            dirty = true;
            debug!(
                user = %user,
                periods = accrual.periods,
                loss = accrual.loss,
                "Applied bank tax accrual"
            );
        }

        // Persist repairs and accrual so a stale balance is never observed twice
        if dirty {
            self.save(user, &wallet)?;
        }

        Ok((wallet, accrual))
    }

    /// Persist the full wallet as a single key write
    pub fn save(&self, user: &UserId, wallet: &Wallet) -> CrumbResult<()> {
        let raw = serde_json::to_vec(wallet)?;
        self.kv.set(user.as_str(), raw)
    }

    /// Remove a user's record entirely
    pub fn delete(&self, user: &UserId) -> CrumbResult<()> {
        self.kv.delete(user.as_str())
    }

    /// Every wallet key in the store. Non-digit keys belong to other
    /// subsystems and are never treated as wallets.
    pub fn user_ids(&self) -> CrumbResult<Vec<UserId>> {
        Ok(self
            .kv
            .keys()?
            .into_iter()
            .filter(|k| UserId::is_wallet_key(k))
            .map(UserId)
            .collect())
    }

    /// Number of wallet records currently stored
    pub fn wallet_count(&self) -> CrumbResult<usize> {
        Ok(self.user_ids()?.len())
    }

    /// Delete every wallet record. Returns the number of records removed.
    pub fn wipe(&self) -> CrumbResult<usize> {
        let users = self.user_ids()?;
        let mut removed = 0;
        for user in &users {
            self.kv.delete(user.as_str())?;
            removed += 1;
        }
        warn!(removed, "Wiped all wallet records");
        Ok(removed)
    }

    fn fetch_or_default(&self, user: &UserId, now: u64) -> CrumbResult<(Wallet, bool)> {
        match self.kv.get(user.as_str())? {
            // First access: synthesize and mark for persistence
            None => Ok((Wallet::new_at(now), true)),
            Some(raw) => match serde_json::from_slice::<Wallet>(&raw) {
                Ok(wallet) => Ok((wallet, false)),
                Err(e) => {
                    warn!(
                        user = %user,
                        error = %e,
                        "Replacing unreadable wallet record with defaults"
                    );
                    Ok((Wallet::new_at(now), true))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crumb_types::CurrencyKind;

    const DAY: u64 = 86_400;

    fn test_store() -> LedgerStore<MemoryKvStore> {
        LedgerStore::new(
            MemoryKvStore::new(),
            Arc::new(Catalog::default()),
            TaxPolicy::default(),
        )
    }

    fn raw(store: &LedgerStore<MemoryKvStore>, user: &UserId) -> Vec<u8> {
        store.kv.get(user.as_str()).unwrap().unwrap()
    }

    #[test]
    fn test_first_access_synthesizes_and_persists() {
        let store = test_store();
        let user = UserId::from(42u64);

        let wallet = store.load_at(&user, 1000).unwrap();
        assert_eq!(wallet.last_taxed, 1000);
        assert_eq!(wallet.balance(&CurrencyKind::primary()), 0);

        // The synthesized wallet was written back
        assert!(store.kv.contains(user.as_str()));
    }

    #[test]
    fn test_missing_currency_kind_repaired_and_persisted() {
        let store = test_store();
        let user = UserId::from(1u64);

        // Simulate a record written before "matcha" existed
        let old = r#"{"balances":{"cookie":5,"milk":2},"bank":0,"last_taxed":1000}"#;
        store.kv.set(user.as_str(), old.as_bytes().to_vec()).unwrap();

        let wallet = store.load_at(&user, 1000).unwrap();
        assert_eq!(wallet.balance(&CurrencyKind::new("matcha")), 0);
        assert_eq!(wallet.balance(&CurrencyKind::primary()), 5);

        // The repair reached the store
        let reread: Wallet = serde_json::from_slice(&raw(&store, &user)).unwrap();
        assert_eq!(reread.balance(&CurrencyKind::new("matcha")), 0);
    }

    #[test]
    fn test_corrupt_record_replaced_with_defaults() {
        let store = test_store();
        let user = UserId::from(2u64);

        store.kv.set(user.as_str(), b"not json at all".to_vec()).unwrap();

        let wallet = store.load_at(&user, 777).unwrap();
        assert_eq!(wallet.last_taxed, 777);
        assert_eq!(wallet.bank, 0);

        // The replacement is durable
        let reread: Wallet = serde_json::from_slice(&raw(&store, &user)).unwrap();
        assert_eq!(reread, wallet);
    }

    #[test]
    fn test_lazy_accrual_applied_and_persisted_once() {
        let store = test_store();
        let user = UserId::from(3u64);

        let mut wallet = Wallet::new_at(0);
        wallet.credit_bank(1000).unwrap();
        store.save(&user, &wallet).unwrap();

        // Two days later: two periods of 3%
        let (loaded, accrual) = store.accrue_at(&user, 2 * DAY).unwrap();
        assert_eq!(accrual.periods, 2);
        assert_eq!(loaded.bank, 1000 * 97 / 100 * 97 / 100);
        assert_eq!(loaded.last_taxed, 2 * DAY);

        // Loading again at the same instant must not double-tax
        let (again, accrual) = store.accrue_at(&user, 2 * DAY).unwrap();
        assert!(!accrual.changed());
        assert_eq!(again.bank, loaded.bank);
    }

    #[test]
    fn test_legacy_record_without_tax_clock() {
        let store = test_store();
        let user = UserId::from(4u64);

        // No last_taxed at all; must start the clock at load time instead of
        // taxing from epoch zero
        let old = r#"{"balances":{"cookie":1},"bank":500}"#;
        store.kv.set(user.as_str(), old.as_bytes().to_vec()).unwrap();

        let wallet = store.load_at(&user, 5 * DAY).unwrap();
        assert_eq!(wallet.bank, 500);
        assert_eq!(wallet.last_taxed, 5 * DAY);
    }

    #[test]
    fn test_user_ids_skip_foreign_keys() {
        let store = test_store();
        store.kv.set("101", b"{}".to_vec()).unwrap();
        store.kv.set("202", b"{}".to_vec()).unwrap();
        store.kv.set("schema_version", b"1".to_vec()).unwrap();

        let mut ids = store.user_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec![UserId::from("101"), UserId::from("202")]);
        assert_eq!(store.wallet_count().unwrap(), 2);
    }

    #[test]
    fn test_wipe_removes_only_wallets() {
        let store = test_store();
        store.kv.set("101", b"{}".to_vec()).unwrap();
        store.kv.set("202", b"{}".to_vec()).unwrap();
        store.kv.set("schema_version", b"1".to_vec()).unwrap();

        let removed = store.wipe().unwrap();
        assert_eq!(removed, 2);
        assert!(!store.kv.contains("101"));
        assert!(!store.kv.contains("202"));
        assert!(store.kv.contains("schema_version"));
    }
}
