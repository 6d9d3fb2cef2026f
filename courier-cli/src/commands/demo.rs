//! `courier demo` - the auction scenario
//!
//! A bidder registers, an auction ends, and payment and notification react
//! through the broker without being called directly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Args;
use courier_core::{DurableBroker, EventBroker, InMemoryBroker};
use tokio::time::Instant;
use uuid::Uuid;

use super::AUCTION_EVENT_TYPES;
use super::history::print_entries;
use super::info::print_info;
use crate::backend::{self, Backend};
use crate::config::CourierConfig;
use crate::services::{
    AuctionService, LimitGateway, Notification, NotificationService, PaymentService,
    RegistrationService,
};

const DEMO_CARD_NUMBER: &str = "4242-4242-4242-4242";

/// Arguments for the `demo` command
#[derive(Debug, Args)]
pub struct DemoArgs {
    /// Broker backend
    #[arg(short, long, value_enum, default_value_t = Backend::Memory)]
    pub backend: Backend,

    /// Name of the registering bidder
    #[arg(long, default_value = "Alice")]
    pub bidder: String,

    /// Winning price
    #[arg(long, default_value_t = 99.99)]
    pub price: f64,

    /// Highest charge the payment gateway approves
    #[arg(long, default_value_t = 1_000.0)]
    pub limit: f64,

    /// Seconds to wait for the notification
    #[arg(long, default_value_t = 5)]
    pub wait: u64,
}

pub async fn run(args: DemoArgs, config: &CourierConfig) -> Result<()> {
    match args.backend {
        Backend::Memory => {
            let broker: Arc<dyn EventBroker> = Arc::new(InMemoryBroker::default());
            run_scenario(&args, &broker).await?;
            broker.close().await?;
        }
        Backend::Durable => {
            let durable = Arc::new(backend::open_durable(config).await?);
            let broker: Arc<dyn EventBroker> = Arc::clone(&durable) as Arc<dyn EventBroker>;
            run_scenario(&args, &broker).await?;
            show_persisted(&durable).await?;
            durable.close().await?;
        }
    }
    Ok(())
}

async fn run_scenario(args: &DemoArgs, broker: &Arc<dyn EventBroker>) -> Result<()> {
    println!("--- System Initialization ---");
    PaymentService::attach(broker, Arc::new(LimitGateway { limit: args.limit })).await?;
    let notifications = NotificationService::attach(broker).await?;
    let registration = RegistrationService::new(Arc::clone(broker));
    let auctions = AuctionService::new(Arc::clone(broker));
    println!("--- System Ready ---\n");

    println!("--- Step 1: A new bidder registers ---");
    let bidder = registration
        .register_bidder(&args.bidder, DEMO_CARD_NUMBER)
        .await?;
    println!("Registered '{}' as {}\n", bidder.name, bidder.bidder_id);

    println!("--- Step 2: An auction ends ---");
    let auction_id = Uuid::new_v4();
    auctions
        .end_auction(auction_id, bidder.bidder_id, args.price)
        .await?;
    println!("Auction {} sold for {:.2}\n", auction_id, args.price);

    let sent = wait_for_notice(&notifications, auction_id, Duration::from_secs(args.wait)).await;
    let Some(notice) = sent else {
        bail!(
            "No notification for auction {} within {}s",
            auction_id,
            args.wait
        );
    };

    println!("--- Simulation Finished ---");
    println!("[Notification Service] {}", notice);
    println!("Payment and notification reacted to AuctionEnded without being called directly.");
    Ok(())
}

/// Poll the notification log for `auction_id` until `wait` elapses.
async fn wait_for_notice(
    notifications: &NotificationService,
    auction_id: Uuid,
    wait: Duration,
) -> Option<Notification> {
    let deadline = Instant::now() + wait;
    loop {
        if let Some(notice) = notifications
            .sent()
            .into_iter()
            .find(|n| n.auction_id == auction_id)
        {
            return Some(notice);
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn show_persisted(broker: &DurableBroker) -> Result<()> {
    println!("\n--- Persisted Streams ---");
    for event_type in AUCTION_EVENT_TYPES {
        let info = broker.get_stream_info(event_type).await?;
        print_info(&broker.config().stream_name(event_type), &info);
        print_entries(event_type, &broker.get_history(event_type, 3).await?, false)?;
        println!();
    }
    Ok(())
}
