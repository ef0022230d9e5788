//! Key commands
//!
//! Issue, inspect and administer API keys.

use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use meter_core::services::metering::{KeyAdmin, KeyStore};
use meter_core::{ApiKeyRecord, KeyStatus, KeyType};

use super::{or_dash, Context};
use crate::output::{print_detail, print_output, print_success, FieldRow};

#[derive(Subcommand)]
pub enum KeyAction {
    /// Show one key
    Show {
        /// API key
        api_key: String,
    },

    /// Issue a new key
    Issue {
        /// Key type: trial, patreon, metered, lifetime
        #[arg(short = 't', long = "type")]
        key_type: KeyType,

        /// Owner email
        #[arg(short, long)]
        email: String,

        /// Character limit (not accepted for trials)
        #[arg(short, long)]
        limit: Option<i64>,

        /// Allow billed usage beyond the limit
        #[arg(long)]
        overage: bool,

        /// Billing provider customer code
        #[arg(long)]
        customer_code: Option<String>,

        /// Expire after this many days
        #[arg(long)]
        expires_in_days: Option<i64>,
    },

    /// Push a key's expiration into the future
    Extend {
        /// API key
        api_key: String,

        /// Days from now
        #[arg(short, long, default_value = "30")]
        days: i64,
    },

    /// Change a key's character limit
    SetLimit {
        /// API key
        api_key: String,

        /// New character limit
        limit: i64,

        /// Also set whether overage is allowed
        #[arg(long)]
        overage: Option<bool>,
    },

    /// Cancel (or delete) a key
    Cancel {
        /// API key
        api_key: String,

        /// Mark deleted instead of canceled
        #[arg(long)]
        delete: bool,
    },

    /// List issued keys
    List {
        /// Only keys of this type
        #[arg(short = 't', long = "type")]
        key_type: Option<KeyType>,
    },
}

/// Key row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct KeyRow {
    #[tabled(rename = "API Key")]
    pub api_key: String,
    #[tabled(rename = "Type")]
    pub key_type: String,
    #[tabled(rename = "Email")]
    pub email: String,
    #[tabled(rename = "Limit")]
    pub character_limit: i64,
    #[tabled(rename = "Overage")]
    pub overage_allowed: bool,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Expires")]
    pub expires: String,
}

impl From<&ApiKeyRecord> for KeyRow {
    fn from(record: &ApiKeyRecord) -> Self {
        Self {
            api_key: record.api_key.clone(),
            key_type: record.key_type.to_string(),
            email: record.email.clone(),
            character_limit: record.character_limit,
            overage_allowed: record.overage_allowed,
            status: record.status.to_string(),
            expires: or_dash(
                record
                    .expiration_datetime()
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string()),
            ),
        }
    }
}

pub async fn execute(ctx: &Context, action: KeyAction) -> Result<()> {
    match action {
        KeyAction::Show { api_key } => show_key(ctx, &api_key).await,
        KeyAction::Issue {
            key_type,
            email,
            limit,
            overage,
            customer_code,
            expires_in_days,
        } => {
            issue_key(
                ctx,
                key_type,
                &email,
                limit,
                overage,
                customer_code,
                expires_in_days,
            )
            .await
        }
        KeyAction::Extend { api_key, days } => extend_key(ctx, &api_key, days).await,
        KeyAction::SetLimit {
            api_key,
            limit,
            overage,
        } => set_limit(ctx, &api_key, limit, overage).await,
        KeyAction::Cancel { api_key, delete } => cancel_key(ctx, &api_key, delete).await,
        KeyAction::List { key_type } => list_keys(ctx, key_type).await,
    }
}

fn admin(ctx: &Context) -> KeyAdmin {
    KeyAdmin::new(ctx.store.clone(), ctx.layout())
}

fn keys(ctx: &Context) -> KeyStore {
    KeyStore::new(ctx.store.clone(), ctx.layout())
}

fn print_record(ctx: &Context, record: &ApiKeyRecord) -> Result<()> {
    let fields = vec![
        FieldRow::new("api_key", &record.api_key),
        FieldRow::new("type", record.key_type),
        FieldRow::new("email", &record.email),
        FieldRow::new("character_limit", record.character_limit),
        FieldRow::new("overage_allowed", record.overage_allowed),
        FieldRow::new("status", record.status),
        FieldRow::new(
            "expiration",
            or_dash(record.expiration_datetime().map(|d| d.to_rfc3339())),
        ),
        FieldRow::new("customer_code", or_dash(record.customer_code.as_deref())),
    ];
    print_detail(record, fields, ctx.format)
}

async fn show_key(ctx: &Context, api_key: &str) -> Result<()> {
    let record = keys(ctx).resolve(api_key).await?;
    print_record(ctx, &record)
}

async fn issue_key(
    ctx: &Context,
    key_type: KeyType,
    email: &str,
    limit: Option<i64>,
    overage: bool,
    customer_code: Option<String>,
    expires_in_days: Option<i64>,
) -> Result<()> {
    let admin = admin(ctx);

    if key_type == KeyType::Trial {
        let ignored: Vec<&str> = [
            (limit.is_some(), "--limit"),
            (overage, "--overage"),
            (customer_code.is_some(), "--customer-code"),
            (expires_in_days.is_some(), "--expires-in-days"),
        ]
        .into_iter()
        .filter_map(|(given, flag)| given.then_some(flag))
        .collect();
        if !ignored.is_empty() {
            bail!(
                "{} cannot be used with trial keys; trials take their limit and validity from METER_TRIAL_CHARACTER_LIMIT and METER_TRIAL_VALIDITY_DAYS",
                ignored.join(", ")
            );
        }

        let issuance = admin.issue_trial(email, &ctx.config).await?;
        if issuance.newly_issued {
            print_success(&format!("Issued trial key for {}", issuance.record.email), ctx.quiet);
        } else {
            print_success(
                &format!("{} already has a trial key", issuance.record.email),
                ctx.quiet,
            );
        }
        return print_record(ctx, &issuance.record);
    }

    let Some(limit) = limit.or(match key_type {
        KeyType::LifetimeGrant => Some(0),
        _ => None,
    }) else {
        bail!("--limit is required for {} keys", key_type);
    };

    let mut record = admin.issue(key_type, email, limit).await?;
    let mut changed = false;
    if overage {
        record = record.with_overage(true);
        changed = true;
    }
    if let Some(code) = customer_code {
        record = record.with_customer_code(code);
        changed = true;
    }
    if let Some(days) = expires_in_days {
        record = record.with_expiration(Utc::now() + Duration::days(days));
        changed = true;
    }
    if changed {
        admin.save(&record).await?;
    }

    print_success(&format!("Issued {} key for {}", key_type, record.email), ctx.quiet);
    print_record(ctx, &record)
}

async fn extend_key(ctx: &Context, api_key: &str, days: i64) -> Result<()> {
    if days <= 0 {
        bail!("--days must be positive");
    }
    let until = Utc::now() + Duration::days(days);
    let record = admin(ctx).extend_expiration(api_key, until).await?;
    print_success(
        &format!("{} now expires {}", api_key, until.format("%Y-%m-%d")),
        ctx.quiet,
    );
    print_record(ctx, &record)
}

async fn set_limit(ctx: &Context, api_key: &str, limit: i64, overage: Option<bool>) -> Result<()> {
    let admin = admin(ctx);
    let mut record = admin.set_character_limit(api_key, limit).await?;
    if let Some(overage) = overage {
        record = admin.set_overage(api_key, overage).await?;
    }
    print_success(&format!("Set character limit of {} to {}", api_key, limit), ctx.quiet);
    print_record(ctx, &record)
}

async fn cancel_key(ctx: &Context, api_key: &str, delete: bool) -> Result<()> {
    let status = if delete {
        KeyStatus::Deleted
    } else {
        KeyStatus::Canceled
    };
    admin(ctx).set_status(api_key, status).await?;
    print_success(&format!("{} is now {}", api_key, status), ctx.quiet);
    Ok(())
}

async fn list_keys(ctx: &Context, key_type: Option<KeyType>) -> Result<()> {
    let keys = keys(ctx);
    let types = match key_type {
        Some(t) => vec![t],
        None => KeyType::ALL.to_vec(),
    };

    let mut rows = Vec::new();
    for key_type in types {
        for api_key in keys.list(key_type).await? {
            match keys.resolve(&api_key).await {
                Ok(record) => rows.push(KeyRow::from(&record)),
                Err(e) => log::warn!("[meter:keys] skipping {}: {}", api_key, e),
            }
        }
    }

    print_output(&rows, ctx.format)
}
