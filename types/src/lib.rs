// ========== Core Modules ==========
pub mod catalog;        // Shop offers and derived currency values
pub mod tax;            // Bank tax accrual math
pub mod wallet;         // Per-user wallet record

// Export commonly used types
pub use catalog::{Catalog, CurrencyValues, ItemOffer, RoleOffer, TemporaryItem};
pub use tax::{Accrual, TaxPolicy};
pub use wallet::{ActiveEffect, CurrencyKind, UserId, Wallet};

/// Current unix time in whole seconds
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// Error types
pub type CrumbResult<T> = Result<T, CrumbError>;

#[derive(Debug, thiserror::Error)]
pub enum CrumbError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Cannot target yourself")]
    SelfTarget,

    #[error("Insufficient {kind}: have {have}, need {need}")]
    InsufficientFunds { kind: String, have: u64, need: u64 },

    #[error("Already owned: {0}")]
    AlreadyOwned(String),

    #[error("On cooldown: {remaining_secs}s remaining")]
    Cooldown { remaining_secs: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Balance overflow")]
    Overflow,
}
