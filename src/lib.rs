pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::{
    config::Config,
    database::store::MessageStore,
    error::Result,
    middleware::auth::AuthConfig,
    routes::webhook::WebhookSecrets,
    services::{
        analytics_service::AnalyticsService,
        delivery_service::{DeliveryRouter, DeliveryTransports},
        gateway_service::GatewayService,
        graph_service::GraphService,
        identity_service::IdentityResolver,
        manychat_service::ManyChatService,
        message_service::MessageService,
        normalizer_service::NormalizerService,
        transport::ProfileSource,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub normalizer: NormalizerService,
    pub message_service: MessageService,
    pub delivery_router: DeliveryRouter,
    pub analytics_service: AnalyticsService,
    pub webhook_secrets: WebhookSecrets,
    pub auth: AuthConfig,
}

impl AppState {
    /// Wires the live provider clients around `store`.
    pub fn new(config: &Config, store: Arc<dyn MessageStore>) -> Result<Self> {
        let timeout = config.provider_timeout();

        let manychat = Arc::new(ManyChatService::new(
            &config.manychat_api_base,
            config.manychat_api_key.clone(),
            timeout,
        )?);
        let graph = Arc::new(GraphService::new(
            &config.graph_api_base,
            &config.graph_api_version,
            config.meta_page_access_token.clone(),
            timeout,
        )?);
        let gateway = Arc::new(GatewayService::new(
            &config.whatsapp_gateway_base,
            &config.whatsapp_instance_id,
            &config.whatsapp_instance_token,
            config.whatsapp_client_token.clone(),
            timeout,
        )?);

        let profiles: Arc<dyn ProfileSource> = graph.clone();
        let transports = DeliveryTransports {
            subscriber_platform: manychat.clone(),
            subscriber_directory: manychat,
            graph_send: graph.clone(),
            gateway,
        };
        Ok(Self::with_transports(config, store, transports, Some(profiles)))
    }

    /// Same wiring with caller-supplied providers.
    pub fn with_transports(
        config: &Config,
        store: Arc<dyn MessageStore>,
        transports: DeliveryTransports,
        profiles: Option<Arc<dyn ProfileSource>>,
    ) -> Self {
        let mut resolver = IdentityResolver::new(store.clone());
        if let Some(profiles) = profiles {
            resolver = resolver.with_profiles(profiles, config.provider_timeout());
        }

        let message_service = MessageService::new(
            store.clone(),
            resolver,
            chrono::Duration::seconds(config.dedup_window_secs),
        );
        let delivery_router = DeliveryRouter::new(
            store.clone(),
            transports,
            config.default_country_code.clone(),
            config.provider_timeout(),
        );
        let analytics_service = AnalyticsService::new(store.clone(), config.response_pairing);

        Self {
            normalizer: NormalizerService::new(config.default_country_code.clone()),
            message_service,
            delivery_router,
            analytics_service,
            webhook_secrets: WebhookSecrets {
                shared_secret: config.webhook_secret.clone(),
                meta_verify_token: config.meta_verify_token.clone(),
                meta_app_secret: config.meta_app_secret.clone(),
            },
            auth: AuthConfig::new(&config.jwt_secret),
            store,
        }
    }
}
