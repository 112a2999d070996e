use axum::{
    extract::{Query, State},
    response::Json,
    Extension,
};
use chrono::{Duration, Utc};

use crate::{
    database::store::TimeWindow,
    dto::analytics_dto::MetricsQuery,
    error::Result,
    middleware::auth::AccountId,
    services::analytics_service::Metrics,
    AppState,
};

const DEFAULT_WINDOW_DAYS: i64 = 30;

#[utoipa::path(
    get,
    path = "/api/analytics/metrics",
    params(MetricsQuery),
    responses(
        (status = 200, description = "Per-channel engagement and response times", body = Metrics),
        (status = 400, description = "Window end before start")
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler]
pub async fn get_metrics(
    State(state): State<AppState>,
    Extension(AccountId(account_id)): Extension<AccountId>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<Metrics>> {
    let end = query.end.unwrap_or_else(Utc::now);
    let start = query
        .start
        .unwrap_or_else(|| end - Duration::days(DEFAULT_WINDOW_DAYS));
    let window = TimeWindow::new(start, end)?;

    let metrics = state
        .analytics_service
        .compute_metrics(account_id, query.channel, window)
        .await?;
    Ok(Json(metrics))
}
