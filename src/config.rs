use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_address: String,

    /// Absent key leaves the payment endpoints answering with a
    /// configuration error instead of failing startup.
    pub paystack_secret_key: Option<String>,
    pub paystack_base_url: String,
    pub gateway_timeout_secs: u64,

    pub currency: String,
    pub min_payment_amount: Decimal,
    pub max_payment_amount: Decimal,
    pub charge_email_domain: String,

    pub max_init_attempts: u32,
    pub init_window_secs: u64,
    pub rate_limit_per_minute: u32,
    pub allowed_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("database_url", "postgresql://localhost/savings")?
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("paystack_base_url", "https://api.paystack.co")?
            .set_default("gateway_timeout_secs", 30)?
            .set_default("currency", "GHS")?
            .set_default("min_payment_amount", 1)?
            .set_default("max_payment_amount", 10_000)?
            .set_default("charge_email_domain", "members.savings.local")?
            .set_default("max_init_attempts", 5)?
            .set_default("init_window_secs", 600)?
            .set_default("rate_limit_per_minute", 120)?
            .set_default("allowed_origins", vec!["http://localhost:3000"])?
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allowed_origins"),
            )
            .build()?
            .try_deserialize()
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn init_window(&self) -> Duration {
        Duration::from_secs(self.init_window_secs)
    }
}
