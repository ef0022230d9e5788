//! Usage commands
//!
//! Views over usage counters and seen sets, plus the billing-cycle reset.

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use meter_core::services::metering::{
    KeyAdmin, Period, Scope, UsageFilter, UsageReport, UsageRow, UsageTracker, ALL_MARKER,
};

use super::{or_dash, Context};
use crate::output::{print_detail, print_info, print_output, print_success, FieldRow};

#[derive(Subcommand)]
pub enum UsageAction {
    /// Current counters and seen sets of one key
    Show {
        /// API key
        api_key: String,
    },

    /// List counters of one scope and period
    List {
        /// Scope: user or global
        #[arg(long, default_value = "global")]
        scope: Scope,

        /// Period: daily, monthly, lifetime or recurring
        #[arg(short, long, default_value = "monthly")]
        period: Period,

        /// Filter by service
        #[arg(short, long)]
        service: Option<String>,

        /// Filter by API key
        #[arg(long)]
        api_key: Option<String>,

        /// First day or month to include (YYYY-MM-DD or YYYY-MM)
        #[arg(long)]
        start: Option<String>,

        /// Last day or month to include (YYYY-MM-DD or YYYY-MM)
        #[arg(long)]
        end: Option<String>,
    },

    /// Start a new billing cycle for a metered key
    ResetCycle {
        /// API key
        api_key: String,
    },
}

/// Counter row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct CounterRow {
    #[tabled(rename = "Scope")]
    pub scope: String,
    #[tabled(rename = "Period")]
    pub period: String,
    #[tabled(rename = "Bucket")]
    pub bucket: String,
    #[tabled(rename = "API Key")]
    pub api_key: String,
    #[tabled(rename = "Service")]
    pub service: String,
    #[tabled(rename = "Type")]
    pub request_type: String,
    #[tabled(rename = "Characters")]
    pub characters: i64,
    #[tabled(rename = "Requests")]
    pub requests: i64,
}

impl From<&UsageRow> for CounterRow {
    fn from(row: &UsageRow) -> Self {
        Self {
            scope: row.key.scope.to_string(),
            period: row.key.period.to_string(),
            bucket: or_dash(row.key.bucket.as_deref()),
            api_key: or_dash(row.key.api_key.as_deref()),
            service: row
                .key
                .service
                .clone()
                .unwrap_or_else(|| ALL_MARKER.to_string()),
            request_type: row
                .key
                .request_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| ALL_MARKER.to_string()),
            characters: row.usage.characters,
            requests: row.usage.requests,
        }
    }
}

pub async fn execute(ctx: &Context, action: UsageAction) -> Result<()> {
    match action {
        UsageAction::Show { api_key } => show_usage(ctx, &api_key).await,
        UsageAction::List {
            scope,
            period,
            service,
            api_key,
            start,
            end,
        } => {
            let filter = UsageFilter {
                api_key,
                service,
                start_bucket: start.map(|s| to_bucket(&s, period)).transpose()?,
                end_bucket: end.map(|s| to_bucket(&s, period)).transpose()?,
            };
            list_usage(ctx, scope, period, &filter).await
        }
        UsageAction::ResetCycle { api_key } => reset_cycle(ctx, &api_key).await,
    }
}

async fn show_usage(ctx: &Context, api_key: &str) -> Result<()> {
    let report = UsageReport::new(ctx.store.clone(), ctx.layout());
    let rows: Vec<CounterRow> = report
        .current_for_key(api_key, Utc::now())
        .await?
        .iter()
        .map(CounterRow::from)
        .collect();
    print_output(&rows, ctx.format)?;

    let seen = UsageTracker::new(ctx.store.clone(), ctx.layout())
        .seen(api_key)
        .await?;
    if !ctx.quiet && ctx.format == crate::output::OutputFormat::Table {
        print_info("", false);
        print_info(&format!("Services:        {}", seen.services.join(", ")), false);
        print_info(&format!("Languages:       {}", seen.languages.join(", ")), false);
        print_info(&format!("Clients:         {}", seen.clients.join(", ")), false);
        print_info(&format!("Client versions: {}", seen.client_versions.join(", ")), false);
    }
    Ok(())
}

async fn list_usage(ctx: &Context, scope: Scope, period: Period, filter: &UsageFilter) -> Result<()> {
    let report = UsageReport::new(ctx.store.clone(), ctx.layout());
    let rows: Vec<CounterRow> = report
        .list(scope, period, filter)
        .await?
        .iter()
        .map(CounterRow::from)
        .collect();
    print_output(&rows, ctx.format)
}

async fn reset_cycle(ctx: &Context, api_key: &str) -> Result<()> {
    let previous = KeyAdmin::new(ctx.store.clone(), ctx.layout())
        .reset_cycle(api_key)
        .await?;
    print_success(&format!("Started a new billing cycle for {}", api_key), ctx.quiet);
    let fields = vec![
        FieldRow::new("characters", previous.characters),
        FieldRow::new("requests", previous.requests),
    ];
    print_detail(&previous, fields, ctx.format)
}

/// Convert a date argument to the bucket format of `period`
fn to_bucket(input: &str, period: Period) -> Result<String> {
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{}-01", input), "%Y-%m-%d"))
        .map_err(|_| anyhow!("Invalid date: {}. Use YYYY-MM-DD or YYYY-MM", input))?;

    Ok(match period {
        Period::Daily => date.format("%Y%m%d").to_string(),
        _ => date.format("%Y%m").to_string(),
    })
}
