//! userpay background worker
//!
//! Handles scheduled jobs including:
//! - Subscription maintenance: autorenewal shutoff, period tiling and line
//!   item materialization (daily at 2:00 UTC)
//! - Billing run: aggregate unbound line items into payments and settle
//!   them through the processor chain (daily at 2:30 UTC)
//! - Pending payment retry (hourly)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use userpay_payments::{
    InMemoryVault, Ledger, LogNotifier, Payments, PleasePayMail, Processor, StripeGateway,
    WithStripeCustomer,
};
use userpay_shared::BillingConfig;
use userpay_subscriptions::SubscriptionEngine;

/// The settlement strategies tried in order for every payment: charge the
/// stored payment method first, fall back to a "please pay" mail.
fn build_processors(gateway: Arc<StripeGateway>, config: &BillingConfig) -> Vec<Arc<dyn Processor>> {
    let notifier = Arc::new(LogNotifier);
    let vault = Arc::new(InMemoryVault::new(gateway.clone()));
    vec![
        Arc::new(WithStripeCustomer::new(
            gateway,
            vault,
            notifier.clone(),
            config.clone(),
        )),
        Arc::new(PleasePayMail::new(notifier, config)),
    ]
}

/// Run the daily maintenance pass: cancel past-due subscriptions, tile new
/// periods and materialize their line items.
async fn run_subscription_maintenance(engine: &SubscriptionEngine) {
    let today = Utc::now().date_naive();

    match engine.disable_autorenewal(today).await {
        Ok(cancelled) if !cancelled.is_empty() => {
            info!(cancelled = cancelled.len(), "disabled autorenewal for past-due subscriptions");
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "autorenewal shutoff failed"),
    }

    let periods = engine.create_periods_all(today).await;

    match engine.create_line_items().await {
        Ok(items) => {
            info!(
                periods = periods,
                line_items = items.len(),
                "subscription maintenance complete"
            );
        }
        Err(e) => error!(error = %e, "line item materialization failed"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting userpay worker");

    let config = BillingConfig::from_env();
    let ledger = Ledger::new();
    let engine = SubscriptionEngine::new(ledger.clone(), config.clone());
    let payments = Arc::new(Payments::new(ledger, Arc::new(engine.clone())));

    let gateway = match StripeGateway::from_env() {
        Some(gateway) => Arc::new(gateway),
        None => {
            // If Stripe isn't configured, run in minimal mode
            warn!("STRIPE_SECRET_KEY not set - running in minimal mode");
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };
    let processors = Arc::new(build_processors(gateway, &config));

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Subscription maintenance (daily at 2:00 UTC)
    let maintenance_engine = engine.clone();
    scheduler
        .add(Job::new_async("0 0 2 * * *", move |_uuid, _l| {
            let engine = maintenance_engine.clone();
            Box::pin(async move {
                info!("Running subscription maintenance");
                run_subscription_maintenance(&engine).await;
            })
        })?)
        .await?;
    info!("Scheduled: Subscription maintenance (daily at 2:00 UTC)");

    // Job 2: Billing run (daily at 2:30 UTC, after maintenance)
    let billing_payments = payments.clone();
    let billing_processors = processors.clone();
    scheduler
        .add(Job::new_async("0 30 2 * * *", move |_uuid, _l| {
            let payments = billing_payments.clone();
            let processors = billing_processors.clone();
            Box::pin(async move {
                info!("Running billing pass over unbound line items");
                if let Err(e) = payments.process_unbound_items(&processors).await {
                    error!(error = %e, "billing pass failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Billing run (daily at 2:30 UTC)");

    // Job 3: Retry pending payments (hourly)
    let retry_payments = payments.clone();
    let retry_processors = processors.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let payments = retry_payments.clone();
            let processors = retry_processors.clone();
            Box::pin(async move {
                info!("Retrying pending payments");
                if let Err(e) = payments.process_pending_payments(&processors).await {
                    error!(error = %e, "pending payment retry failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Pending payment retry (hourly)");

    // Job 4: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("userpay worker started successfully with {} scheduled jobs", 4);

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
