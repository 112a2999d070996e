use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::conversation::Channel;

/// Registry entry naming the account that owns a provider page, instance or
/// bot. Inbound events for unregistered pages are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAccount {
    pub channel: Channel,
    pub page_id: String,
    pub account_id: Uuid,
}
