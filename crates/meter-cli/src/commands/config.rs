//! Config commands
//!
//! Shows the effective configuration and where each value came from.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::output::print_output;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
}

/// Config row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct ConfigRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Source")]
    pub source: String,
}

pub async fn execute(ctx: &Context, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => show_config(ctx),
    }
}

fn show_config(ctx: &Context) -> Result<()> {
    let config = &ctx.config;
    let billing = &config.billing;

    let rows = vec![
        row("METER_DB_PATH", config.db_path.to_string_lossy()),
        row("METER_KEY_PREFIX", &config.key_prefix),
        row("METER_DAILY_TTL_DAYS", config.daily_ttl_days),
        row("METER_MONTHLY_TTL_DAYS", config.monthly_ttl_days),
        row("METER_TRIAL_CHARACTER_LIMIT", config.trial_character_limit),
        row("METER_TRIAL_VALIDITY_DAYS", config.trial_validity_days),
        row("METER_BILLING_URL", billing.base_url.as_deref().unwrap_or("-")),
        row("METER_BILLING_USER", billing.user.as_deref().unwrap_or("-")),
        row("METER_BILLING_API_KEY", mask_token(&billing.api_key)),
        row("METER_BILLING_CHAR_MULTIPLIER", billing.char_multiplier),
    ];

    print_output(&rows, ctx.format)
}

fn row(key: &str, value: impl ToString) -> ConfigRow {
    ConfigRow {
        key: key.to_string(),
        value: value.to_string(),
        source: if std::env::var(key).is_ok() { "env" } else { "default" }.to_string(),
    }
}

fn mask_token(token: &Option<String>) -> String {
    match token {
        Some(t) if !t.is_empty() => "****".to_string(),
        _ => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token(&None), "-");
        assert_eq!(mask_token(&Some(String::new())), "-");
        assert_eq!(mask_token(&Some("secret".to_string())), "****");
    }
}
