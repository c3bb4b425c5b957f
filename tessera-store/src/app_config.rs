use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub providers: ProvidersConfig,
    pub business_rules: BusinessRules,
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    pub stripe: StripeConfig,
    pub windcave: WindcaveConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StripeConfig {
    /// Platform account key. Overrides the direct key when set.
    #[serde(default)]
    pub platform_secret_key: Option<String>,
    /// Fallback key for deployments charging on their own account.
    #[serde(default)]
    pub direct_secret_key: Option<String>,
    pub webhook_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WindcaveConfig {
    pub base_url: String,
    pub username: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    /// Platform fee charged per completed order.
    #[serde(default = "default_fee_percent")]
    pub platform_fee_percent: f64,
    #[serde(default = "default_fee_fixed")]
    pub platform_fee_fixed_cents: i64,
    /// Invoices below this are not generated.
    #[serde(default = "default_min_charge")]
    pub minimum_invoice_charge_cents: i64,
    /// How long a declined payment may be retried before the order fails.
    #[serde(default = "default_retry_minutes")]
    pub payment_retry_minutes: i64,
    pub tax_rate: f64,
    pub tax_inclusive: bool,
    pub tax_country: String,
    pub booking_fee_cents: i64,
}

fn default_fee_percent() -> f64 {
    1.0
}

fn default_fee_fixed() -> i64 {
    50
}

fn default_min_charge() -> i64 {
    100
}

fn default_retry_minutes() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationsConfig {
    /// Internal notification fan-out endpoint. Absent in test setups.
    pub notify_url: Option<String>,
    /// Transactional email service endpoint for order receipts.
    pub receipts_url: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file
            // Default to 'development' env
            // Note that this file is _optional_
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked in to git
            .add_source(config::File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of TESSERA)
            // Eg.. `TESSERA_SERVER__PORT=8080` would set the server port
            .add_source(config::Environment::with_prefix("TESSERA").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
