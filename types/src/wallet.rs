//! Wallet - Per-User Balance Record
//!
//! Design Philosophy:
//! - One wallet per user id; synthesized on first access, repaired on load
//! - Item counts live in a kind -> count map; the bank balance is its own field
//! - All mutation goes through checked credit/debit so a wallet can never be
//!   committed with a negative or overflowed balance

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::catalog::CurrencyValues;
use crate::{CrumbError, CrumbResult};

/// Opaque user identifier (the chat platform's numeric id, as a string key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a raw store key is a wallet key. Wallet keys are all-digit
    /// user ids; anything else in the store belongs to someone else and is
    /// never swept or wiped.
    pub fn is_wallet_key(key: &str) -> bool {
        !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Currency/item kind identifier (e.g., "cookie", "milk", "coffee")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyKind(pub String);

impl CurrencyKind {
    /// The primary currency everything else is priced in
    pub const PRIMARY: &'static str = "cookie";

    pub fn primary() -> Self {
        Self(Self::PRIMARY.to_string())
    }

    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_primary(&self) -> bool {
        self.0 == Self::PRIMARY
    }
}

impl Default for CurrencyKind {
    fn default() -> Self {
        Self::primary()
    }
}

impl std::fmt::Display for CurrencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CurrencyKind {
    fn from(kind: &str) -> Self {
        Self(kind.to_string())
    }
}

/// A time-boxed cosmetic effect granted by spending items.
/// At most one is active per wallet; applying a new one replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEffect {
    /// Item kind that was spent to grant the effect
    pub kind: CurrencyKind,
    /// Unix seconds after which the effect is expired
    pub expires_at: u64,
}

/// Per-user record of currency balances, bank balance, and timestamps.
///
/// Every field defaults so that records written by older schema versions
/// deserialize cleanly and get repaired in place on the next load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Item and primary-currency counts, one entry per recognized kind
    #[serde(default)]
    pub balances: BTreeMap<CurrencyKind, u64>,

    /// Banked balance, subject to periodic tax accrual
    #[serde(default)]
    pub bank: u64,

    /// Unix seconds of the last whole-period tax boundary
    #[serde(default)]
    pub last_taxed: u64,

    /// Unix seconds of the last daily-salary claim
    #[serde(default)]
    pub last_daily: u64,

    /// Active temporary effect, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<ActiveEffect>,
}

impl Wallet {
    /// Create a fresh all-zero wallet whose tax clock starts now
    pub fn new_at(now: u64) -> Self {
        Self {
            balances: BTreeMap::new(),
            bank: 0,
            last_taxed: now,
            last_daily: 0,
            effect: None,
        }
    }

    /// Get the held count of a currency kind (0 for unknown kinds)
    pub fn balance(&self, kind: &CurrencyKind) -> u64 {
        self.balances.get(kind).copied().unwrap_or(0)
    }

    /// Add to a balance, rejecting overflow
    pub fn credit(&mut self, kind: &CurrencyKind, amount: u64) -> CrumbResult<()> {
        let slot = self.balances.entry(kind.clone()).or_insert(0);
        *slot = slot.checked_add(amount).ok_or(CrumbError::Overflow)?;
        Ok(())
    }

    /// Remove from a balance, rejecting shortfalls
    pub fn debit(&mut self, kind: &CurrencyKind, amount: u64) -> CrumbResult<()> {
        let have = self.balance(kind);
        if have < amount {
            return Err(CrumbError::InsufficientFunds {
                kind: kind.to_string(),
                have,
                need: amount,
            });
        }
        self.balances.insert(kind.clone(), have - amount);
        Ok(())
    }

    /// Add to the bank balance, rejecting overflow
    pub fn credit_bank(&mut self, amount: u64) -> CrumbResult<()> {
        self.bank = self.bank.checked_add(amount).ok_or(CrumbError::Overflow)?;
        Ok(())
    }

    /// Remove from the bank balance, rejecting shortfalls
    pub fn debit_bank(&mut self, amount: u64) -> CrumbResult<()> {
        if self.bank < amount {
            return Err(CrumbError::InsufficientFunds {
                kind: "bank".to_string(),
                have: self.bank,
                need: amount,
            });
        }
        self.bank -= amount;
        Ok(())
    }

    /// Insert any missing recognized kinds at zero.
    /// Returns true if the wallet was modified (schema repair happened).
    pub fn ensure_kinds(&mut self, kinds: impl IntoIterator<Item = CurrencyKind>) -> bool {
        let mut changed = false;
        for kind in kinds {
            if !self.balances.contains_key(&kind) {
                self.balances.insert(kind, 0);
                changed = true;
            }
        }
        changed
    }

    /// The effect that is still active at `now`, if any
    pub fn active_effect_at(&self, now: u64) -> Option<&ActiveEffect> {
        self.effect.as_ref().filter(|e| e.expires_at > now)
    }

    /// Total net worth in primary-currency units: every held kind at its
    /// catalog value, plus the bank balance at face value.
    pub fn net_worth(&self, values: &CurrencyValues) -> u64 {
        let held: u64 = self
            .balances
            .iter()
            .map(|(kind, count)| count.saturating_mul(values.value_of(kind)))
            .sum();
        held.saturating_add(self.bank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[test]
    fn test_credit_debit() {
        let mut wallet = Wallet::new_at(1000);
        let cookie = CurrencyKind::primary();

        wallet.credit(&cookie, 10).unwrap();
        assert_eq!(wallet.balance(&cookie), 10);

        wallet.debit(&cookie, 4).unwrap();
        assert_eq!(wallet.balance(&cookie), 6);

        // Shortfall is rejected without mutation
        let err = wallet.debit(&cookie, 7).unwrap_err();
        assert!(matches!(err, CrumbError::InsufficientFunds { have: 6, need: 7, .. }));
        assert_eq!(wallet.balance(&cookie), 6);
    }

    #[test]
    fn test_credit_overflow() {
        let mut wallet = Wallet::new_at(0);
        let cookie = CurrencyKind::primary();
        wallet.credit(&cookie, u64::MAX - 1).unwrap();
        assert!(matches!(wallet.credit(&cookie, 2), Err(CrumbError::Overflow)));
    }

    #[test]
    fn test_bank_operations() {
        let mut wallet = Wallet::new_at(0);
        wallet.credit_bank(100).unwrap();
        wallet.debit_bank(40).unwrap();
        assert_eq!(wallet.bank, 60);
        assert!(wallet.debit_bank(61).is_err());
        assert_eq!(wallet.bank, 60);
    }

    #[test]
    fn test_ensure_kinds_repair() {
        let catalog = Catalog::default();
        let mut wallet = Wallet::new_at(0);

        // Fresh wallet is missing every kind
        let changed = wallet.ensure_kinds(catalog.currency_kinds());
        assert!(changed);
        assert_eq!(wallet.balance(&CurrencyKind::new("milk")), 0);
        assert_eq!(wallet.balance(&CurrencyKind::primary()), 0);

        // Second pass is a no-op
        assert!(!wallet.ensure_kinds(catalog.currency_kinds()));
    }

    #[test]
    fn test_old_schema_deserializes() {
        // A record written before `last_daily` and `effect` existed
        let old = r#"{"balances":{"cookie":7},"bank":3,"last_taxed":500}"#;
        let wallet: Wallet = serde_json::from_str(old).unwrap();
        assert_eq!(wallet.balance(&CurrencyKind::primary()), 7);
        assert_eq!(wallet.bank, 3);
        assert_eq!(wallet.last_daily, 0);
        assert!(wallet.effect.is_none());
    }

    #[test]
    fn test_active_effect_expiry() {
        let mut wallet = Wallet::new_at(0);
        wallet.effect = Some(ActiveEffect {
            kind: CurrencyKind::new("coffee"),
            expires_at: 100,
        });

        assert!(wallet.active_effect_at(99).is_some());
        assert!(wallet.active_effect_at(100).is_none());
    }

    #[test]
    fn test_net_worth_includes_bank() {
        let catalog = Catalog::default();
        let values = catalog.currency_values();

        let mut wallet = Wallet::new_at(0);
        wallet.credit(&CurrencyKind::primary(), 5).unwrap();
        wallet.credit(&CurrencyKind::new("milk"), 2).unwrap(); // milk is worth 10
        wallet.credit_bank(7).unwrap();

        assert_eq!(wallet.net_worth(&values), 5 + 2 * 10 + 7);
    }

    #[test]
    fn test_wallet_key_filter() {
        assert!(UserId::is_wallet_key("123456789"));
        assert!(!UserId::is_wallet_key(""));
        assert!(!UserId::is_wallet_key("config"));
        assert!(!UserId::is_wallet_key("123abc"));
    }
}
