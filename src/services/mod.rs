pub mod analytics_service;
pub mod delivery_service;
pub mod gateway_service;
pub mod graph_service;
pub mod identity_service;
pub mod manychat_service;
pub mod message_service;
pub mod normalizer_service;
pub mod transport;
