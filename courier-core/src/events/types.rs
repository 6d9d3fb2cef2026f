//! Event type definitions

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::wire::Payload;

/// An event with a fixed type name and a known payload shape
pub trait TypedEvent: Into<Event> + Clone + Send + Sync + 'static {
    /// Name the event is published under
    const EVENT_TYPE: &'static str;

    /// Flatten into the wire payload
    fn to_payload(&self) -> Payload;
}

/// A bidder completed registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidderRegistered {
    pub bidder_id: Uuid,
    pub name: String,
    pub credit_card_token: String,
}

/// An auction closed with a winner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionEnded {
    pub auction_id: Uuid,
    pub winning_bidder_id: Uuid,
    pub winning_price: f64,
}

/// Payment for a won auction was attempted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentProcessed {
    pub auction_id: Uuid,
    pub bidder_id: Uuid,
    pub amount: f64,
    pub status: String,
}

impl TypedEvent for BidderRegistered {
    const EVENT_TYPE: &'static str = "BidderRegistered";

    fn to_payload(&self) -> Payload {
        Payload::new()
            .with("bidder_id", self.bidder_id)
            .with("name", self.name.as_str())
            .with("credit_card_token", self.credit_card_token.as_str())
    }
}

impl TypedEvent for AuctionEnded {
    const EVENT_TYPE: &'static str = "AuctionEnded";

    fn to_payload(&self) -> Payload {
        Payload::new()
            .with("auction_id", self.auction_id)
            .with("winning_bidder_id", self.winning_bidder_id)
            .with("winning_price", self.winning_price)
    }
}

impl TypedEvent for PaymentProcessed {
    const EVENT_TYPE: &'static str = "PaymentProcessed";

    fn to_payload(&self) -> Payload {
        Payload::new()
            .with("auction_id", self.auction_id)
            .with("bidder_id", self.bidder_id)
            .with("amount", self.amount)
            .with("status", self.status.as_str())
    }
}

/// A delivered event: one of the known variants, or the raw mapping when no
/// reconstruction rule matched
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    BidderRegistered(BidderRegistered),
    AuctionEnded(AuctionEnded),
    PaymentProcessed(PaymentProcessed),
    Raw(Payload),
}

impl Event {
    /// Type name for typed variants; `None` for raw payloads
    pub fn event_type(&self) -> Option<&'static str> {
        match self {
            Self::BidderRegistered(_) => Some(BidderRegistered::EVENT_TYPE),
            Self::AuctionEnded(_) => Some(AuctionEnded::EVENT_TYPE),
            Self::PaymentProcessed(_) => Some(PaymentProcessed::EVENT_TYPE),
            Self::Raw(_) => None,
        }
    }

    /// Whether no typed variant matched
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }

    /// Wire payload for this event
    pub fn to_payload(&self) -> Payload {
        match self {
            Self::BidderRegistered(e) => e.to_payload(),
            Self::AuctionEnded(e) => e.to_payload(),
            Self::PaymentProcessed(e) => e.to_payload(),
            Self::Raw(p) => p.clone(),
        }
    }
}

impl From<BidderRegistered> for Event {
    fn from(e: BidderRegistered) -> Self {
        Self::BidderRegistered(e)
    }
}

impl From<AuctionEnded> for Event {
    fn from(e: AuctionEnded) -> Self {
        Self::AuctionEnded(e)
    }
}

impl From<PaymentProcessed> for Event {
    fn from(e: PaymentProcessed) -> Self {
        Self::PaymentProcessed(e)
    }
}

impl From<Payload> for Event {
    fn from(p: Payload) -> Self {
        Self::Raw(p)
    }
}
