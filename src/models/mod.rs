pub mod channel_account;
pub mod conversation;
pub mod delivery_attempt;
pub mod inbound_event;
pub mod message;
