//! Event type registry
//!
//! Turns a decoded payload back into a typed [`Event`] by structural
//! matching: rules are tried in registration order and the first rule whose
//! required fields are all present and whose constructor succeeds wins.
//! Nothing matching is not an error; the raw mapping is delivered instead.

use std::fmt;

use tracing::trace;
use uuid::Uuid;

use super::types::{AuctionEnded, BidderRegistered, Event, PaymentProcessed, TypedEvent};
use crate::wire::Payload;

type BuildFn = Box<dyn Fn(&Payload) -> Option<Event> + Send + Sync>;

/// How to rebuild one typed event from a payload
pub struct ReconstructionRule {
    event_type: String,
    required_fields: Vec<String>,
    build: BuildFn,
}

impl ReconstructionRule {
    pub fn new<F>(event_type: impl Into<String>, required_fields: &[&str], build: F) -> Self
    where
        F: Fn(&Payload) -> Option<Event> + Send + Sync + 'static,
    {
        Self {
            event_type: event_type.into(),
            required_fields: required_fields.iter().map(|f| f.to_string()).collect(),
            build: Box::new(build),
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    fn matches(&self, payload: &Payload) -> bool {
        self.required_fields.iter().all(|f| payload.contains_key(f))
    }
}

impl fmt::Debug for ReconstructionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconstructionRule")
            .field("event_type", &self.event_type)
            .field("required_fields", &self.required_fields)
            .finish_non_exhaustive()
    }
}

/// Ordered set of reconstruction rules
#[derive(Debug, Default)]
pub struct EventRegistry {
    rules: Vec<ReconstructionRule>,
}

impl EventRegistry {
    /// A registry with no rules; every payload is delivered raw.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that knows the auction events, in priority order
    /// `BidderRegistered`, `AuctionEnded`, `PaymentProcessed`.
    pub fn with_auction_events() -> Self {
        Self::new()
            .with_rule(ReconstructionRule::new(
                BidderRegistered::EVENT_TYPE,
                &["bidder_id", "name", "credit_card_token"],
                |p| {
                    Some(Event::BidderRegistered(BidderRegistered {
                        bidder_id: uuid_field(p, "bidder_id")?,
                        name: p.get("name")?.to_string(),
                        credit_card_token: p.get("credit_card_token")?.to_string(),
                    }))
                },
            ))
            .with_rule(ReconstructionRule::new(
                AuctionEnded::EVENT_TYPE,
                &["auction_id", "winning_bidder_id", "winning_price"],
                |p| {
                    Some(Event::AuctionEnded(AuctionEnded {
                        auction_id: uuid_field(p, "auction_id")?,
                        winning_bidder_id: uuid_field(p, "winning_bidder_id")?,
                        winning_price: p.get_f64("winning_price")?,
                    }))
                },
            ))
            .with_rule(ReconstructionRule::new(
                PaymentProcessed::EVENT_TYPE,
                &["auction_id", "bidder_id", "amount", "status"],
                |p| {
                    Some(Event::PaymentProcessed(PaymentProcessed {
                        auction_id: uuid_field(p, "auction_id")?,
                        bidder_id: uuid_field(p, "bidder_id")?,
                        amount: p.get_f64("amount")?,
                        status: p.get("status")?.to_string(),
                    }))
                },
            ))
    }

    /// Append a rule with the lowest priority so far.
    #[must_use]
    pub fn with_rule(mut self, rule: ReconstructionRule) -> Self {
        self.register(rule);
        self
    }

    pub fn register(&mut self, rule: ReconstructionRule) {
        self.rules.push(rule);
    }

    /// Rule names in priority order
    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(ReconstructionRule::event_type)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rebuild the first matching typed event, or hand back the raw payload.
    pub fn reconstruct(&self, payload: Payload) -> Event {
        for rule in &self.rules {
            if !rule.matches(&payload) {
                continue;
            }
            match (rule.build)(&payload) {
                Some(event) => return event,
                None => trace!(rule = %rule.event_type, "Rule fields present but values invalid"),
            }
        }
        Event::Raw(payload)
    }
}

fn uuid_field(payload: &Payload, key: &str) -> Option<Uuid> {
    payload.get_str(key)?.parse().ok()
}
