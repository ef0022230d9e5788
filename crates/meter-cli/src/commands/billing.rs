//! Billing commands
//!
//! Inspect billing slices and run reconciliation against the configured
//! billing provider.

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use meter_core::services::billing::{
    BillingReconciler, HttpBillingProvider, KeyReport, ReportOutcome,
};
use meter_core::services::metering::BillingSlice;

use super::Context;
use crate::output::{print_detail, print_info, print_output, print_success, FieldRow};

#[derive(Subcommand)]
pub enum BillingAction {
    /// Show the unreported characters of a key
    Slice {
        /// API key
        api_key: String,
    },

    /// Take and zero a key's slice without reporting it
    Reset {
        /// API key
        api_key: String,
    },

    /// Report slices to the billing provider
    Report {
        /// Only this key (defaults to every metered key)
        #[arg(long)]
        api_key: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct SliceView<'a> {
    api_key: &'a str,
    characters: i64,
}

/// Reconciliation row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct ReportRow {
    #[tabled(rename = "API Key")]
    pub api_key: String,
    #[tabled(rename = "Outcome")]
    pub outcome: String,
    #[tabled(rename = "Characters")]
    pub characters: String,
    #[tabled(rename = "Units")]
    pub units: String,
    #[tabled(rename = "Detail")]
    pub detail: String,
}

impl From<&KeyReport> for ReportRow {
    fn from(report: &KeyReport) -> Self {
        let (outcome, characters, units, detail) = match &report.outcome {
            ReportOutcome::Reported { characters, units } => (
                "reported",
                characters.to_string(),
                format!("{:.3}", units),
                String::new(),
            ),
            ReportOutcome::Skipped { reason } => {
                ("skipped", "-".to_string(), "-".to_string(), reason.to_string())
            }
            ReportOutcome::Failed { error } => {
                ("failed", "-".to_string(), "-".to_string(), error.clone())
            }
        };
        Self {
            api_key: report.api_key.clone(),
            outcome: outcome.to_string(),
            characters,
            units,
            detail,
        }
    }
}

pub async fn execute(ctx: &Context, action: BillingAction) -> Result<()> {
    match action {
        BillingAction::Slice { api_key } => show_slice(ctx, &api_key).await,
        BillingAction::Reset { api_key } => reset_slice(ctx, &api_key).await,
        BillingAction::Report { api_key } => report(ctx, api_key).await,
    }
}

fn slice(ctx: &Context) -> BillingSlice {
    BillingSlice::new(ctx.store.clone(), ctx.layout())
}

async fn show_slice(ctx: &Context, api_key: &str) -> Result<()> {
    let characters = slice(ctx).read(api_key).await?;
    print_detail(
        &SliceView {
            api_key,
            characters,
        },
        vec![
            FieldRow::new("api_key", api_key),
            FieldRow::new("characters", characters),
        ],
        ctx.format,
    )
}

async fn reset_slice(ctx: &Context, api_key: &str) -> Result<()> {
    let characters = slice(ctx).snapshot_and_reset(api_key).await?;
    print_success(
        &format!("Reset slice of {} ({} characters taken)", api_key, characters),
        ctx.quiet,
    );
    print_detail(
        &SliceView {
            api_key,
            characters,
        },
        vec![
            FieldRow::new("api_key", api_key),
            FieldRow::new("characters", characters),
        ],
        ctx.format,
    )
}

async fn report(ctx: &Context, api_key: Option<String>) -> Result<()> {
    if !ctx.config.billing.is_configured() {
        bail!("Billing provider not configured. Set METER_BILLING_URL.");
    }
    let provider = Arc::new(HttpBillingProvider::new(&ctx.config.billing)?);
    let reconciler = BillingReconciler::new(ctx.store.clone(), &ctx.config, provider);

    let reports = match api_key {
        Some(api_key) => {
            let outcome = match reconciler.report_key(&api_key).await {
                Ok(outcome) => outcome,
                Err(e) => ReportOutcome::Failed {
                    error: e.to_string(),
                },
            };
            vec![KeyReport { api_key, outcome }]
        }
        None => reconciler.report_all().await?.keys,
    };

    let rows: Vec<ReportRow> = reports.iter().map(ReportRow::from).collect();
    print_output(&rows, ctx.format)?;

    let failed = reports
        .iter()
        .filter(|r| matches!(r.outcome, ReportOutcome::Failed { .. }))
        .count();
    print_info(
        &format!("{} keys processed, {} failed", reports.len(), failed),
        ctx.quiet || ctx.format == crate::output::OutputFormat::Json,
    );
    Ok(())
}
