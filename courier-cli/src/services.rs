//! Auction demo services
//!
//! Each service only talks to the broker it was given. Payment reacts to
//! `AuctionEnded` by publishing `PaymentProcessed`; notification reacts to
//! `PaymentProcessed`. Neither is ever called directly.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use courier_core::{
    AuctionEnded, BidderRegistered, BrokerError, Event, EventBroker, EventHandler, HandlerResult,
    PaymentProcessed, TypedEvent,
};
use tracing::info;
use uuid::Uuid;

pub const STATUS_SUCCESS: &str = "SUCCESS";
pub const STATUS_FAILED: &str = "FAILED";

/// Publishes `BidderRegistered`
pub struct RegistrationService {
    broker: Arc<dyn EventBroker>,
}

impl RegistrationService {
    pub fn new(broker: Arc<dyn EventBroker>) -> Self {
        Self { broker }
    }

    /// Register a bidder; the card number is exchanged for an opaque token.
    pub async fn register_bidder(
        &self,
        name: &str,
        _credit_card_number: &str,
    ) -> Result<BidderRegistered, BrokerError> {
        info!(name, "Registering bidder");
        let simple = Uuid::new_v4().simple().to_string();
        let event = BidderRegistered {
            bidder_id: Uuid::new_v4(),
            name: name.to_string(),
            credit_card_token: format!("tok_{}", &simple[..8]),
        };
        self.broker.publish_event(&event).await?;
        Ok(event)
    }
}

/// Publishes `AuctionEnded`
pub struct AuctionService {
    broker: Arc<dyn EventBroker>,
}

impl AuctionService {
    pub fn new(broker: Arc<dyn EventBroker>) -> Self {
        Self { broker }
    }

    pub async fn end_auction(
        &self,
        auction_id: Uuid,
        winner_id: Uuid,
        price: f64,
    ) -> Result<AuctionEnded, BrokerError> {
        info!(%auction_id, "Auction ended");
        let event = AuctionEnded {
            auction_id,
            winning_bidder_id: winner_id,
            winning_price: price,
        };
        self.broker.publish_event(&event).await?;
        Ok(event)
    }
}

/// Decides whether a charge goes through
pub trait PaymentGateway: Send + Sync {
    fn charge(&self, bidder_id: Uuid, amount: f64) -> bool;
}

/// Approves positive amounts up to a limit
#[derive(Debug, Clone, Copy)]
pub struct LimitGateway {
    pub limit: f64,
}

impl PaymentGateway for LimitGateway {
    fn charge(&self, _bidder_id: Uuid, amount: f64) -> bool {
        amount > 0.0 && amount <= self.limit
    }
}

/// Charges auction winners and publishes the outcome
pub struct PaymentService {
    broker: Weak<dyn EventBroker>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentService {
    /// Subscribe a payment service to `AuctionEnded` on `broker`.
    pub async fn attach(
        broker: &Arc<dyn EventBroker>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<(), BrokerError> {
        let service = Arc::new(Self {
            broker: Arc::downgrade(broker),
            gateway,
        });
        broker.subscribe(AuctionEnded::EVENT_TYPE, service).await
    }
}

#[async_trait]
impl EventHandler for PaymentService {
    async fn handle(&self, event: &Event) -> HandlerResult {
        let Event::AuctionEnded(ended) = event else {
            return Err(format!("expected AuctionEnded, got {:?}", event).into());
        };
        let broker = self.broker.upgrade().ok_or("broker is gone")?;

        let approved = self
            .gateway
            .charge(ended.winning_bidder_id, ended.winning_price);
        let status = if approved { STATUS_SUCCESS } else { STATUS_FAILED };
        info!(
            bidder_id = %ended.winning_bidder_id,
            amount = ended.winning_price,
            status,
            "Processed payment"
        );

        broker
            .publish_event(&PaymentProcessed {
                auction_id: ended.auction_id,
                bidder_id: ended.winning_bidder_id,
                amount: ended.winning_price,
                status: status.to_string(),
            })
            .await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "payment"
    }
}

/// An email the notification service would send
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub bidder_id: Uuid,
    pub auction_id: Uuid,
    pub success: bool,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(
                f,
                "Sending SUCCESS email to bidder '{}' for winning auction '{}'",
                self.bidder_id, self.auction_id
            )
        } else {
            write!(
                f,
                "Sending FAILED email to bidder '{}' for auction '{}'",
                self.bidder_id, self.auction_id
            )
        }
    }
}

/// Turns `PaymentProcessed` into notifications
#[derive(Default)]
pub struct NotificationService {
    sent: Mutex<Vec<Notification>>,
}

impl NotificationService {
    /// Subscribe a notification service to `PaymentProcessed` on `broker`.
    pub async fn attach(broker: &Arc<dyn EventBroker>) -> Result<Arc<Self>, BrokerError> {
        let service = Arc::new(Self::default());
        broker
            .subscribe(PaymentProcessed::EVENT_TYPE, Arc::clone(&service) as Arc<dyn EventHandler>)
            .await?;
        Ok(service)
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventHandler for NotificationService {
    async fn handle(&self, event: &Event) -> HandlerResult {
        let Event::PaymentProcessed(payment) = event else {
            return Err(format!("expected PaymentProcessed, got {:?}", event).into());
        };

        let notification = Notification {
            bidder_id: payment.bidder_id,
            auction_id: payment.auction_id,
            success: payment.status == STATUS_SUCCESS,
        };
        info!("{}", notification);
        self.sent
            .lock()
            .map_err(|_| "notification log poisoned")?
            .push(notification);
        Ok(())
    }

    fn name(&self) -> &str {
        "notification"
    }
}
