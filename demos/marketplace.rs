//! Walks one coupon through the marketplace: two members, a top-up, a
//! listing, a purchase and a redemption. Configuration comes from the
//! environment (a `.env` file is honoured), e.g.
//!
//! ```text
//! COUPON_LEDGER_DB_PATH=/tmp/coupons.db RUST_LOG=debug cargo run --example marketplace
//! ```
use anyhow::Context;
use coupon_ledger::{
    MarketService,
    config::MarketConfig,
    coupon::CouponDraft,
    service::{CouponFilter, TransactionFilter},
    types::{Page, PaymentMethod, TimeStamp},
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = MarketConfig::from_env()?;
    let db = sled::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let service = MarketService::new(Arc::new(db), config)?;

    // emails are unique per database, so tag them per run
    let run = TimeStamp::new().nanos();
    let seller = service.register_user("Sana", &format!("sana+{run}@example.com"))?;
    let buyer = service.register_user("Bilal", &format!("bilal+{run}@example.com"))?;

    service.add_money(&buyer.id, 1_000, PaymentMethod::Upi)?;

    let draft = CouponDraft::new()
        .set_title("40% off large pizzas")
        .set_description("Valid on any large pizza, dine-in or takeaway")
        .set_category("food-dining")
        .set_brand("Pizza Hut")
        .set_discount_percentage(40)
        .set_original_price(1_000)
        .set_selling_price(600)
        .set_coupon_code("PIZZA40")
        .set_expiry_date(TimeStamp::days_from_now(30));
    let coupon = service.list_coupon(&seller.id, draft, b"coupon-photo")?;

    let listed = service.browse(&CouponFilter::default(), Page::default())?;
    println!("{} coupon(s) on the market", listed.total);

    let receipt = service.purchase(&coupon.id, &buyer.id)?;
    println!(
        "{} bought \"{}\" for ₹{}, wallet now ₹{}",
        buyer.name, receipt.coupon.title, receipt.transaction.amount, receipt.new_balance
    );

    service.mark_used(&coupon.id, &buyer.id)?;

    for user in [&buyer, &seller] {
        let history = service.transactions(&user.id, TransactionFilter::default(), Page::default())?;
        println!("{} (balance ₹{})", user.name, service.balance(&user.id)?);
        for entry in history.items {
            println!(
                "  {:<7} {:<16} ₹{:>6}  {} -> {}  {}",
                entry.kind.as_str(),
                entry.category.as_str(),
                entry.amount,
                entry.balance_before,
                entry.balance_after,
                entry.description
            );
        }

        let audit = service.verify_ledger(&user.id)?;
        anyhow::ensure!(audit.is_clean(), "ledger audit failed for {}", user.name);
    }

    service.store().flush()?;
    Ok(())
}
