pub mod demo;
pub mod history;
pub mod info;
pub mod replay;

/// Event types the auction demo publishes
pub const AUCTION_EVENT_TYPES: [&str; 3] = ["BidderRegistered", "AuctionEnded", "PaymentProcessed"];
