//! Economy executor
//!
//! One atomic operation per economic action. Every operation validates its
//! preconditions against a freshly loaded wallet, applies the deltas, and
//! persists only when every precondition held. When an operation has already
//! debited one side and a later external step fails (role grant, display
//! update), the debit is refunded before the error is surfaced.
//!
//! Cross-wallet operations (transfer, steal) are two single-key writes; the
//! store offers no multi-key transactions, so a concurrent reader can observe
//! the window between them. That window is accepted - per-wallet consistency
//! is what the executor guarantees.

use rand::Rng;
use std::sync::Arc;
use tracing::{info, warn};

use crumb_storage::{KvStore, LedgerStore};
use crumb_types::{
    unix_now, ActiveEffect, CrumbError, CrumbResult, CurrencyKind, UserId, Wallet,
};

use crate::drops::{ClaimArbiter, EventId};
use crate::platform::PlatformConnector;

/// Steal succeeds with this probability (percent)
const STEAL_SUCCESS_PERCENT: u64 = 30;
/// Deposit fee, percent of the deposited amount, rounded up, floor of 1
const DEPOSIT_FEE_PERCENT: u64 = 3;
/// Sale fee, percent of the gross sale value, rounded up, floor of 1
const SELL_FEE_PERCENT: u64 = 10;
/// Seconds a temporary effect stays active
const EFFECT_DURATION_SECS: u64 = 24 * 3600;
/// Seconds between daily-salary claims
const DAILY_COOLDOWN_SECS: u64 = 86_400;
/// Daily salary bounds (inclusive)
const DAILY_REWARD_MIN: u64 = 1;
const DAILY_REWARD_MAX: u64 = 5;
/// Slot machine: cost per spin and payout table
const SLOTS_COST: u64 = 1;
const SLOTS_PAIR_PAYOUT: u64 = 5;
const SLOTS_TRIPLE_PAYOUT: u64 = 50;
const SLOTS_JACKPOT_PAYOUT: u64 = 100;
const SLOT_SYMBOL_COUNT: u8 = 6;
const SLOT_JACKPOT_SYMBOL: u8 = 5;
/// Leaderboard queries are capped at this many entries
const LEADERBOARD_MAX: usize = 20;

/// Outcome of a steal attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StealOutcome {
    pub success: bool,
    /// Amount moved on success, or paid as penalty on failure
    pub amount: u64,
}

/// Outcome of a deposit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositReceipt {
    pub fee: u64,
    pub net: u64,
    /// Bank balance after the deposit
    pub bank: u64,
}

/// Outcome of a sale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SellReceipt {
    pub gross: u64,
    pub fee: u64,
    pub net: u64,
}

/// Outcome of a slot spin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotsOutcome {
    pub reels: [u8; 3],
    pub payout: u64,
}

/// Outcome of a dice bet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiceOutcome {
    pub won: bool,
    pub amount: u64,
}

/// One leaderboard row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub user: UserId,
    pub net_worth: u64,
}

/// Executes every economic operation against the ledger store
pub struct EconomyExecutor<K: KvStore> {
    store: Arc<LedgerStore<K>>,
    platform: Arc<dyn PlatformConnector>,
    drops: ClaimArbiter,
}

impl<K: KvStore> EconomyExecutor<K> {
    pub fn new(store: Arc<LedgerStore<K>>, platform: Arc<dyn PlatformConnector>) -> Self {
        Self {
            store,
            platform,
            drops: ClaimArbiter::new(),
        }
    }

    pub fn store(&self) -> &LedgerStore<K> {
        &self.store
    }

    // ========== Drops ==========

    /// Register a regular drop (reward = 1)
    pub fn announce_drop(&self, id: EventId) {
        self.drops.announce_drop(id);
    }

    /// Register an operator bounty with an explicit reward
    pub fn announce_bounty(&self, id: EventId, reward: u64) -> CrumbResult<()> {
        if reward == 0 {
            return Err(CrumbError::InvalidAmount(
                "bounty reward must be at least 1".to_string(),
            ));
        }
        self.drops.announce_bounty(id, reward);
        Ok(())
    }

    pub fn arbiter(&self) -> &ClaimArbiter {
        &self.drops
    }

    /// Resolve a claim attempt: exactly one concurrent caller per event wins
    /// the reward; everyone else gets `NotFound`. The winning claimant is
    /// credited immediately.
    pub fn claim(&self, id: EventId, user: &UserId) -> CrumbResult<u64> {
        let reward = self
            .drops
            .try_claim(&id)
            .ok_or_else(|| CrumbError::NotFound(format!("drop {}", id)))?;

        let mut wallet = self.store.load(user)?;
        wallet.credit(&CurrencyKind::primary(), reward)?;
        self.store.save(user, &wallet)?;

        info!(event = %id, user = %user, reward, "Claim settled");
        Ok(reward)
    }

    // ========== Transfers ==========

    /// Move primary currency from one user to another
    pub fn transfer(&self, giver: &UserId, receiver: &UserId, amount: u64) -> CrumbResult<()> {
        if giver == receiver {
            return Err(CrumbError::SelfTarget);
        }
        require_positive(amount)?;

        let primary = CurrencyKind::primary();
        let now = unix_now();

        let mut giver_wallet = self.store.load_at(giver, now)?;
        giver_wallet.debit(&primary, amount)?;
        self.store.save(giver, &giver_wallet)?;

        // Second single-key write; on failure, put the debited amount back
        let mut receiver_wallet = self.store.load_at(receiver, now)?;
        let credited = receiver_wallet
            .credit(&primary, amount)
            .and_then(|_| self.store.save(receiver, &receiver_wallet));
        if let Err(e) = credited {
            self.refund(giver, &primary, amount);
            return Err(e);
        }

        info!(giver = %giver, receiver = %receiver, amount, "Transfer completed");
        Ok(())
    }

    /// Attempt to steal primary currency from another user. Succeeds 30% of
    /// the time; a failed attempt costs the stealer the full amount as a
    /// penalty, with the victim untouched.
    pub fn steal(&self, stealer: &UserId, victim: &UserId, amount: u64) -> CrumbResult<StealOutcome> {
        let success = rand::thread_rng().gen_range(1..=100) <= STEAL_SUCCESS_PERCENT;
        self.steal_resolved(stealer, victim, amount, success)
    }

    fn steal_resolved(
        &self,
        stealer: &UserId,
        victim: &UserId,
        amount: u64,
        success: bool,
    ) -> CrumbResult<StealOutcome> {
        if stealer == victim {
            return Err(CrumbError::SelfTarget);
        }
        require_positive(amount)?;

        let primary = CurrencyKind::primary();
        let now = unix_now();

        let mut stealer_wallet = self.store.load_at(stealer, now)?;
        let stealer_balance = stealer_wallet.balance(&primary);
        // The stealer must be able to cover the penalty before rolling
        if stealer_balance < amount {
            return Err(CrumbError::InsufficientFunds {
                kind: primary.to_string(),
                have: stealer_balance,
                need: amount,
            });
        }

        let mut victim_wallet = self.store.load_at(victim, now)?;
        let victim_balance = victim_wallet.balance(&primary);
        if victim_balance < amount {
            return Err(CrumbError::InsufficientFunds {
                kind: primary.to_string(),
                have: victim_balance,
                need: amount,
            });
        }

        if success {
            victim_wallet.debit(&primary, amount)?;
            self.store.save(victim, &victim_wallet)?;

            let credited = stealer_wallet
                .credit(&primary, amount)
                .and_then(|_| self.store.save(stealer, &stealer_wallet));
            if let Err(e) = credited {
                self.refund(victim, &primary, amount);
                return Err(e);
            }
            info!(stealer = %stealer, victim = %victim, amount, "Steal succeeded");
        } else {
            stealer_wallet.debit(&primary, amount)?;
            self.store.save(stealer, &stealer_wallet)?;
            info!(stealer = %stealer, victim = %victim, amount, "Steal failed, penalty charged");
        }

        Ok(StealOutcome { success, amount })
    }

    // ========== Bank ==========

    /// Deposit primary currency into the bank, charging the deposit fee
    pub fn deposit(&self, user: &UserId, amount: u64) -> CrumbResult<DepositReceipt> {
        require_positive(amount)?;

        let primary = CurrencyKind::primary();
        let mut wallet = self.store.load(user)?;
        let have = wallet.balance(&primary);
        if have < amount {
            return Err(CrumbError::InsufficientFunds {
                kind: primary.to_string(),
                have,
                need: amount,
            });
        }

        let fee = fee_of(amount, DEPOSIT_FEE_PERCENT);
        let net = amount - fee;
        if net == 0 {
            return Err(CrumbError::InvalidAmount(format!(
                "the deposit fee ({}) consumes the full amount",
                fee
            )));
        }

        wallet.debit(&primary, amount)?;
        wallet.credit_bank(net)?;
        self.store.save(user, &wallet)?;

        info!(user = %user, amount, fee, net, "Deposit completed");
        Ok(DepositReceipt { fee, net, bank: wallet.bank })
    }

    /// Withdraw from the bank into the hand balance, no fee
    pub fn withdraw(&self, user: &UserId, amount: u64) -> CrumbResult<()> {
        require_positive(amount)?;

        let mut wallet = self.store.load(user)?;
        wallet.debit_bank(amount)?;
        wallet.credit(&CurrencyKind::primary(), amount)?;
        self.store.save(user, &wallet)?;

        info!(user = %user, amount, "Withdrawal completed");
        Ok(())
    }

    // ========== Shop ==========

    /// Buy one unit of a catalog item with primary currency
    pub fn buy_item(&self, user: &UserId, kind: &CurrencyKind) -> CrumbResult<()> {
        let offer = self
            .store
            .catalog()
            .item(kind)
            .ok_or_else(|| CrumbError::NotFound(format!("item offer '{}'", kind)))?;

        let mut wallet = self.store.load(user)?;
        wallet.debit(&CurrencyKind::primary(), offer.price)?;
        wallet.credit(kind, 1)?;
        self.store.save(user, &wallet)?;

        info!(user = %user, item = %kind, price = offer.price, "Item purchased");
        Ok(())
    }

    /// Sell catalog items back at their unit price, minus the sale fee
    pub fn sell(&self, user: &UserId, kind: &CurrencyKind, quantity: u64) -> CrumbResult<SellReceipt> {
        let offer = self
            .store
            .catalog()
            .item(kind)
            .ok_or_else(|| CrumbError::NotFound(format!("item offer '{}'", kind)))?;
        require_positive(quantity)?;

        let mut wallet = self.store.load(user)?;
        let held = wallet.balance(kind);
        if held < quantity {
            return Err(CrumbError::InsufficientFunds {
                kind: kind.to_string(),
                have: held,
                need: quantity,
            });
        }

        let gross = quantity.checked_mul(offer.price).ok_or(CrumbError::Overflow)?;
        let fee = fee_of(gross, SELL_FEE_PERCENT);
        let net = gross - fee;
        if net == 0 {
            return Err(CrumbError::InvalidAmount(format!(
                "the sale fee ({}) consumes the full value ({})",
                fee, gross
            )));
        }

        wallet.debit(kind, quantity)?;
        wallet.credit(&CurrencyKind::primary(), net)?;
        self.store.save(user, &wallet)?;

        info!(user = %user, item = %kind, quantity, gross, fee, net, "Items sold");
        Ok(SellReceipt { gross, fee, net })
    }

    /// Buy a role. The price is debited first; if the external grant is then
    /// refused, the debit is refunded and the error surfaced. The permanent
    /// display marker is applied best-effort afterwards - its failure does
    /// not undo the purchase.
    pub async fn buy_role(&self, user: &UserId, role_key: &str) -> CrumbResult<()> {
        let offer = self
            .store
            .catalog()
            .role(role_key)
            .ok_or_else(|| CrumbError::NotFound(format!("role offer '{}'", role_key)))?
            .clone();

        if self.platform.has_role(user, &offer.role_id).await? {
            return Err(CrumbError::AlreadyOwned(offer.name));
        }

        // Reserve: take the price
        let mut wallet = self.store.load(user)?;
        wallet.debit(&offer.currency, offer.price)?;
        self.store.save(user, &wallet)?;

        // Attempt the external grant; compensate on refusal
        if let Err(e) = self.platform.grant_role(user, &offer.role_id).await {
            warn!(user = %user, role = %role_key, error = %e, "Role grant refused, refunding");
            self.refund(user, &offer.currency, offer.price);
            return Err(e);
        }

        if let Some(marker) = &offer.marker {
            if let Err(e) = self.platform.set_display_marker(user, Some(marker)).await {
                warn!(user = %user, role = %role_key, error = %e, "Could not apply role marker");
            }
        }

        info!(user = %user, role = %role_key, price = offer.price, currency = %offer.currency, "Role purchased");
        Ok(())
    }

    /// Spend items on a temporary display effect. The item cost is debited
    /// first; if the display update is refused, the debit is refunded and no
    /// effect is recorded. A new effect replaces any active one.
    pub async fn use_item(&self, user: &UserId, kind: &CurrencyKind) -> CrumbResult<ActiveEffect> {
        let temp = self
            .store
            .catalog()
            .temporary(kind)
            .ok_or_else(|| CrumbError::NotFound(format!("usable item '{}'", kind)))?
            .clone();

        let now = unix_now();
        let mut wallet = self.store.load_at(user, now)?;
        wallet.debit(kind, temp.cost)?;
        self.store.save(user, &wallet)?;

        if let Err(e) = self.platform.set_display_marker(user, Some(&temp.marker)).await {
            warn!(user = %user, item = %kind, error = %e, "Display update refused, refunding");
            self.refund(user, kind, temp.cost);
            return Err(e);
        }

        let effect = ActiveEffect {
            kind: kind.clone(),
            expires_at: now + EFFECT_DURATION_SECS,
        };
        wallet.effect = Some(effect.clone());
        self.store.save(user, &wallet)?;

        info!(user = %user, item = %kind, cost = temp.cost, expires_at = effect.expires_at, "Temporary effect applied");
        Ok(effect)
    }

    // ========== Income & gambling ==========

    /// Claim the daily salary (1-5 primary units, once per 24h)
    pub fn daily(&self, user: &UserId) -> CrumbResult<u64> {
        let reward = rand::thread_rng().gen_range(DAILY_REWARD_MIN..=DAILY_REWARD_MAX);
        self.daily_resolved(user, reward, unix_now())
    }

    fn daily_resolved(&self, user: &UserId, reward: u64, now: u64) -> CrumbResult<u64> {
        let mut wallet = self.store.load_at(user, now)?;

        let elapsed = now.saturating_sub(wallet.last_daily);
        if elapsed < DAILY_COOLDOWN_SECS {
            return Err(CrumbError::Cooldown {
                remaining_secs: DAILY_COOLDOWN_SECS - elapsed,
            });
        }

        wallet.credit(&CurrencyKind::primary(), reward)?;
        wallet.last_daily = now;
        self.store.save(user, &wallet)?;

        info!(user = %user, reward, "Daily salary claimed");
        Ok(reward)
    }

    /// Spin the slot machine for 1 primary unit
    pub fn slots(&self, user: &UserId) -> CrumbResult<SlotsOutcome> {
        let mut rng = rand::thread_rng();
        let reels = [
            rng.gen_range(0..SLOT_SYMBOL_COUNT),
            rng.gen_range(0..SLOT_SYMBOL_COUNT),
            rng.gen_range(0..SLOT_SYMBOL_COUNT),
        ];
        self.slots_resolved(user, reels)
    }

    fn slots_resolved(&self, user: &UserId, reels: [u8; 3]) -> CrumbResult<SlotsOutcome> {
        let primary = CurrencyKind::primary();
        let mut wallet = self.store.load(user)?;
        wallet.debit(&primary, SLOTS_COST)?;

        let payout = if reels[0] == reels[1] && reels[1] == reels[2] {
            if reels[0] == SLOT_JACKPOT_SYMBOL {
                SLOTS_JACKPOT_PAYOUT
            } else {
                SLOTS_TRIPLE_PAYOUT
            }
        } else if reels[0] == reels[1] || reels[1] == reels[2] || reels[0] == reels[2] {
            SLOTS_PAIR_PAYOUT
        } else {
            0
        };

        if payout > 0 {
            wallet.credit(&primary, payout)?;
        }
        self.store.save(user, &wallet)?;

        info!(user = %user, ?reels, payout, "Slots spun");
        Ok(SlotsOutcome { reels, payout })
    }

    /// Even-odds double-or-lose bet on primary currency
    pub fn dice(&self, user: &UserId, amount: u64) -> CrumbResult<DiceOutcome> {
        let won = rand::thread_rng().gen_bool(0.5);
        self.dice_resolved(user, amount, won)
    }

    fn dice_resolved(&self, user: &UserId, amount: u64, won: bool) -> CrumbResult<DiceOutcome> {
        require_positive(amount)?;

        let primary = CurrencyKind::primary();
        let mut wallet = self.store.load(user)?;

        // The bet must be covered before the roll counts
        let have = wallet.balance(&primary);
        if have < amount {
            return Err(CrumbError::InsufficientFunds {
                kind: primary.to_string(),
                have,
                need: amount,
            });
        }

        if won {
            wallet.credit(&primary, amount)?;
        } else {
            wallet.debit(&primary, amount)?;
        }
        self.store.save(user, &wallet)?;

        info!(user = %user, amount, won, "Dice resolved");
        Ok(DiceOutcome { won, amount })
    }

    // ========== Queries ==========

    /// Load a user's wallet (repairing and accruing as a side effect)
    pub fn wallet(&self, user: &UserId) -> CrumbResult<Wallet> {
        self.store.load(user)
    }

    /// A user's net worth in primary-currency units
    pub fn net_worth(&self, user: &UserId) -> CrumbResult<u64> {
        let values = self.store.catalog().currency_values();
        Ok(self.store.load(user)?.net_worth(&values))
    }

    /// Top wallets by net worth, highest first. Zero-worth wallets are
    /// omitted; `count` is capped at 20.
    pub fn leaderboard(&self, count: usize) -> CrumbResult<Vec<LeaderboardEntry>> {
        let count = count.min(LEADERBOARD_MAX);
        let values = self.store.catalog().currency_values();
        let now = unix_now();

        let mut entries = Vec::new();
        for user in self.store.user_ids()? {
            let wallet = self.store.load_at(&user, now)?;
            let net_worth = wallet.net_worth(&values);
            if net_worth > 0 {
                entries.push(LeaderboardEntry { user, net_worth });
            }
        }

        // Highest worth first; ties broken by user id for a stable order
        entries.sort_by(|a, b| b.net_worth.cmp(&a.net_worth).then(a.user.cmp(&b.user)));
        entries.truncate(count);
        Ok(entries)
    }

    /// Every wallet in the store, for the administrative full dump
    pub fn dump(&self) -> CrumbResult<Vec<(UserId, Wallet)>> {
        let now = unix_now();
        let mut all = Vec::new();
        for user in self.store.user_ids()? {
            let wallet = self.store.load_at(&user, now)?;
            all.push((user, wallet));
        }
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all)
    }

    // ========== Administrative overrides ==========

    /// Add to a user's balance with no economic validation. `kind` may name
    /// any recognized currency, or "bank" for the banked balance.
    pub fn admin_award(&self, user: &UserId, kind: &str, amount: u64) -> CrumbResult<()> {
        let mut wallet = self.store.load(user)?;
        match self.admin_target(kind)? {
            AdminTarget::Bank => wallet.credit_bank(amount)?,
            AdminTarget::Kind(kind) => wallet.credit(&kind, amount)?,
        }
        self.store.save(user, &wallet)?;

        info!(user = %user, kind, amount, "Admin award");
        Ok(())
    }

    /// Overwrite a user's balance with no economic validation
    pub fn admin_set(&self, user: &UserId, kind: &str, amount: u64) -> CrumbResult<()> {
        let mut wallet = self.store.load(user)?;
        match self.admin_target(kind)? {
            AdminTarget::Bank => wallet.bank = amount,
            AdminTarget::Kind(kind) => {
                wallet.balances.insert(kind, amount);
            }
        }
        self.store.save(user, &wallet)?;

        info!(user = %user, kind, amount, "Admin set");
        Ok(())
    }

    /// Remove every wallet record from the store
    pub fn admin_wipe(&self) -> CrumbResult<usize> {
        self.store.wipe()
    }

    fn admin_target(&self, kind: &str) -> CrumbResult<AdminTarget> {
        if kind == "bank" {
            return Ok(AdminTarget::Bank);
        }
        let kind = CurrencyKind::new(kind);
        if self.store.catalog().currency_kinds().any(|k| k == kind) {
            Ok(AdminTarget::Kind(kind))
        } else {
            Err(CrumbError::NotFound(format!("currency kind '{}'", kind)))
        }
    }

    /// Best-effort compensation for a failed second phase. A refund that
    /// itself fails leaves the ledger short; that is logged loudly and
    /// swallowed, because the original error is what the caller must see.
    fn refund(&self, user: &UserId, kind: &CurrencyKind, amount: u64) {
        let result = self
            .store
            .load(user)
            .and_then(|mut wallet| {
                wallet.credit(kind, amount)?;
                self.store.save(user, &wallet)
            });
        if let Err(e) = result {
            tracing::error!(user = %user, kind = %kind, amount, error = %e, "Refund failed");
        }
    }
}

enum AdminTarget {
    Bank,
    Kind(CurrencyKind),
}

/// Ceil of `percent`% of `amount`, with a floor of 1
fn fee_of(amount: u64, percent: u64) -> u64 {
    let fee = ((amount as u128 * percent as u128 + 99) / 100) as u64;
    fee.max(1)
}

fn require_positive(amount: u64) -> CrumbResult<()> {
    if amount == 0 {
        return Err(CrumbError::InvalidAmount("amount must be positive".to_string()));
    }
    Ok(())
}
