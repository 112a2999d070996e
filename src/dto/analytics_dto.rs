use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::models::conversation::Channel;

/// Query of `GET /api/analytics/metrics`. The window defaults to the last
/// 30 days ending now.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MetricsQuery {
    /// Limit the breakdown to one channel.
    pub channel: Option<Channel>,
    /// RFC 3339 start of the window, inclusive.
    pub start: Option<DateTime<Utc>>,
    /// RFC 3339 end of the window, inclusive.
    pub end: Option<DateTime<Utc>>,
}
