// ========== Core Modules ==========
pub mod drops;          // Claim arbiter for competitive reward drops
pub mod executor;       // Economy executor (transaction processing)
pub mod platform;       // External chat-platform capability seam
pub mod sweep;          // Periodic tax and effect-expiry sweeps

// Export commonly used types
pub use drops::{ClaimArbiter, EventId};
pub use executor::{
    DiceOutcome, DepositReceipt, EconomyExecutor, LeaderboardEntry, SellReceipt, SlotsOutcome,
    StealOutcome,
};
pub use platform::{MockPlatform, PlatformConnector};
pub use sweep::{
    run_effect_sweep, run_tax_sweep, EffectSweepReport, SweepConfig, Sweeper, TaxSweepReport,
};
