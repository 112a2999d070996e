use axum::extract::DefaultBodyLimit;
use omnichannel_backend::{
    config::{get_config, init_config, Config},
    database::{
        memory::MemoryMessageStore, pool::create_pool, postgres::PgMessageStore,
        store::MessageStore,
    },
    models::channel_account::ChannelAccount,
    routes::app_router,
    AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn MessageStore>> {
    match &config.database_url {
        Some(url) => {
            let pool = create_pool(url, config.store_timeout()).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Using Postgres message store");
            Ok(Arc::new(PgMessageStore::new(pool)))
        }
        None => {
            warn!("DATABASE_URL is not set; messages are kept in memory and lost on restart");
            Ok(Arc::new(MemoryMessageStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    init_config()?;
    let config = get_config()?;

    let store = open_store(config).await?;
    for seed in &config.channel_accounts {
        store
            .register_channel_account(&ChannelAccount {
                channel: seed.channel,
                page_id: seed.page_id.clone(),
                account_id: seed.account_id,
            })
            .await?;
        info!(channel = %seed.channel, page_id = %seed.page_id, "Registered channel account");
    }

    let app_state = AppState::new(config, store)?;

    let app = app_router(app_state, config.webhook_rps, config.api_rps)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024));

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
