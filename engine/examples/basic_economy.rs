//! Walkthrough of the crumb economy engine

use std::sync::Arc;

use crumb_engine::{
    run_effect_sweep, run_tax_sweep, EconomyExecutor, EventId, MockPlatform, PlatformConnector,
};
use crumb_storage::{LedgerStore, MemoryKvStore};
use crumb_types::{Catalog, CurrencyKind, TaxPolicy, UserId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("\n=== crumb economy demo ===\n");

    // 1. Build the store, the platform connector, and the executor
    let store = Arc::new(LedgerStore::new(
        MemoryKvStore::new(),
        Arc::new(Catalog::default()),
        TaxPolicy::default(),
    ));
    let platform = Arc::new(MockPlatform::new());
    let connector: Arc<dyn PlatformConnector> = platform.clone();
    let executor = EconomyExecutor::new(store.clone(), connector);

    let alice = UserId::from(1001u64);
    let bob = UserId::from(1002u64);
    let cookie = CurrencyKind::primary();

    // 2. Seed balances
    executor.admin_award(&alice, "cookie", 200)?;
    executor.admin_award(&bob, "cookie", 50)?;
    println!("Alice starts with {} cookies", executor.wallet(&alice)?.balance(&cookie));
    println!("Bob starts with {} cookies\n", executor.wallet(&bob)?.balance(&cookie));

    // 3. Transfer
    println!("=== transfer: Alice -> Bob, 30 ===");
    executor.transfer(&alice, &bob, 30)?;
    println!("Alice: {}", executor.wallet(&alice)?.balance(&cookie));
    println!("Bob:   {}\n", executor.wallet(&bob)?.balance(&cookie));

    // 4. Bank: deposit charges the 3% fee, the sweep taxes daily
    println!("=== bank ===");
    let receipt = executor.deposit(&alice, 100)?;
    println!("Alice deposited 100 (fee {}, banked {})", receipt.fee, receipt.net);

    let start = executor.wallet(&alice)?.last_taxed;
    let report = run_tax_sweep(store.as_ref(), start + 3 * 86_400);
    println!(
        "Tax sweep three days on: {} wallet(s) taxed, {} cookie(s) collected",
        report.taxed, report.total_loss
    );
    println!("Alice's bank is now {}\n", store.load_at(&alice, start + 3 * 86_400)?.bank);

    // 5. Shop: items and a temporary effect
    println!("=== shop ===");
    for _ in 0..5 {
        executor.buy_item(&bob, &CurrencyKind::new("milk"))?;
    }
    let effect = executor.use_item(&bob, &CurrencyKind::new("milk")).await?;
    println!(
        "Bob spent 5 milk on a display effect (marker {:?})",
        platform.marker_of(&bob)
    );

    let sweep = run_effect_sweep(store.as_ref(), platform.as_ref(), effect.expires_at).await;
    println!("Effect sweep after expiry cleared {} effect(s)\n", sweep.expired);

    // 6. A competitive drop: first claim wins, the rest come up empty
    println!("=== drop ===");
    executor.announce_bounty(EventId(9000), 25)?;
    let won = executor.claim(EventId(9000), &bob)?;
    println!("Bob claimed the 25-cookie bounty: +{}", won);
    println!("Alice's late claim: {:?}\n", executor.claim(EventId(9000), &alice).err());

    // 7. Leaderboard by net worth
    println!("=== leaderboard ===");
    for (rank, entry) in executor.leaderboard(5)?.iter().enumerate() {
        println!("{}. user {} - {} cookies total worth", rank + 1, entry.user, entry.net_worth);
    }

    println!("\n=== demo complete ===\n");
    Ok(())
}
