use crate::error::{Error, Result};
use crate::models::conversation::Channel;
use crate::services::analytics_service::PairingPolicy;
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub webhook_secret: String,
    pub meta_verify_token: String,
    pub meta_app_secret: Option<String>,
    pub meta_page_access_token: String,
    pub graph_api_base: String,
    pub graph_api_version: String,
    pub manychat_api_key: Option<String>,
    pub manychat_api_base: String,
    pub whatsapp_gateway_base: String,
    pub whatsapp_instance_id: String,
    pub whatsapp_instance_token: String,
    pub whatsapp_client_token: Option<String>,
    pub default_country_code: String,
    pub provider_timeout_secs: u64,
    pub store_timeout_secs: u64,
    pub dedup_window_secs: i64,
    pub webhook_rps: u32,
    pub api_rps: u32,
    pub channel_accounts: Vec<ChannelAccountSeed>,
    pub response_pairing: PairingPolicy,
}

/// One `channel:page_id=account_id` entry of `CHANNEL_ACCOUNTS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAccountSeed {
    pub channel: Channel,
    pub page_id: String,
    pub account_id: Uuid,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env_opt("DATABASE_URL"),
            jwt_secret: get_env("JWT_SECRET")?,
            webhook_secret: get_env("WEBHOOK_SECRET")?,
            meta_verify_token: get_env("META_VERIFY_TOKEN")?,
            meta_app_secret: get_env_opt("META_APP_SECRET"),
            meta_page_access_token: get_env("META_PAGE_ACCESS_TOKEN")?,
            graph_api_base: get_env_or("GRAPH_API_BASE", "https://graph.facebook.com"),
            graph_api_version: get_env_or("GRAPH_API_VERSION", "v19.0"),
            manychat_api_key: get_env_opt("MANYCHAT_API_KEY"),
            manychat_api_base: get_env_or("MANYCHAT_API_BASE", "https://api.manychat.com"),
            whatsapp_gateway_base: get_env_or("WHATSAPP_GATEWAY_BASE", "https://api.z-api.io"),
            whatsapp_instance_id: get_env("WHATSAPP_INSTANCE_ID")?,
            whatsapp_instance_token: get_env("WHATSAPP_INSTANCE_TOKEN")?,
            whatsapp_client_token: get_env_opt("WHATSAPP_CLIENT_TOKEN"),
            default_country_code: get_env_or("DEFAULT_COUNTRY_CODE", "55"),
            provider_timeout_secs: get_env_parse_or("PROVIDER_TIMEOUT_SECS", 10)?,
            store_timeout_secs: get_env_parse_or("STORE_TIMEOUT_SECS", 5)?,
            dedup_window_secs: get_env_parse_or("DEDUP_WINDOW_SECS", 60)?,
            webhook_rps: get_env_parse_or("WEBHOOK_RPS", 200)?,
            api_rps: get_env_parse_or("API_RPS", 50)?,
            channel_accounts: parse_channel_accounts(&get_env_or("CHANNEL_ACCOUNTS", ""))?,
            response_pairing: get_env_parse_or("RESPONSE_PAIRING", PairingPolicy::AnyReply)?,
        })
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn get_env_or(name: &str, default: &str) -> String {
    get_env_opt(name).unwrap_or_else(|| default.to_string())
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get_env_opt(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        None => Ok(default),
    }
}

/// Parses `instagram:17841400000=6f0c...;whatsapp:inst-1=9a1b...`.
pub fn parse_channel_accounts(raw: &str) -> Result<Vec<ChannelAccountSeed>> {
    let mut seeds = Vec::new();
    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let invalid = || Error::Config(format!("Invalid CHANNEL_ACCOUNTS entry: {}", entry));
        let (key, account) = entry.split_once('=').ok_or_else(invalid)?;
        let (channel, page_id) = key.split_once(':').ok_or_else(invalid)?;
        let channel: Channel = channel.trim().parse().map_err(|_| invalid())?;
        let account_id = Uuid::parse_str(account.trim()).map_err(|_| invalid())?;
        if page_id.trim().is_empty() {
            return Err(invalid());
        }
        seeds.push(ChannelAccountSeed {
            channel,
            page_id: page_id.trim().to_string(),
            account_id,
        });
    }
    Ok(seeds)
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> Result<&'static Config> {
    CONFIG
        .get()
        .ok_or_else(|| Error::Config("Configuration has not been initialized".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_registry_seed() {
        let seeds = parse_channel_accounts(
            "instagram:1784=6f0c1d8e-0000-4000-8000-000000000001; \
             whatsapp:inst-1=6f0c1d8e-0000-4000-8000-000000000002",
        )
        .unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].channel, Channel::Instagram);
        assert_eq!(seeds[0].page_id, "1784");
        assert_eq!(seeds[1].channel, Channel::WhatsApp);
    }

    #[test]
    fn empty_registry_is_allowed() {
        assert!(parse_channel_accounts("").unwrap().is_empty());
    }

    #[test]
    fn rejects_unknown_channel_and_bad_uuid() {
        assert!(parse_channel_accounts("fax:1=6f0c1d8e-0000-4000-8000-000000000001").is_err());
        assert!(parse_channel_accounts("instagram:1=not-a-uuid").is_err());
        assert!(parse_channel_accounts("instagram=6f0c1d8e-0000-4000-8000-000000000001").is_err());
    }
}
