//! Authorize command
//!
//! Runs one request through the authorizer exactly as the API server would:
//! an allowed request is charged.

use anyhow::Result;
use clap::Args;

use meter_core::services::metering::{RequestType, UsageAuthorizer, UsageRequest};

use super::{or_dash, Context};
use crate::output::{print_detail, print_warning, FieldRow};

#[derive(Args)]
pub struct AuthorizeArgs {
    /// API key
    pub api_key: String,

    /// Service name, e.g. Azure
    #[arg(short, long)]
    pub service: String,

    /// Request type: translation, transliteration, audio, dictionary
    #[arg(short = 't', long)]
    pub request_type: RequestType,

    /// Characters in the request
    #[arg(short, long)]
    pub chars: i64,

    /// Target language
    #[arg(short, long)]
    pub language: Option<String>,

    /// Client name
    #[arg(long)]
    pub client: Option<String>,

    /// Client version
    #[arg(long)]
    pub client_version: Option<String>,
}

pub async fn execute(ctx: &Context, args: AuthorizeArgs) -> Result<()> {
    let request = UsageRequest {
        language: args.language,
        client: args.client,
        client_version: args.client_version,
        ..UsageRequest::new(args.api_key, args.service, args.request_type, args.chars)
    };

    let authorizer = UsageAuthorizer::new(ctx.store.clone(), &ctx.config);
    let result = authorizer.authorize(&request).await?;

    if let Some(reason) = result.deny_reason {
        if !ctx.quiet {
            print_warning(&format!("Denied: {}", reason));
        }
    }

    let fields = vec![
        FieldRow::new("allowed", result.allowed),
        FieldRow::new("deny_reason", or_dash(result.deny_reason)),
        FieldRow::new("over_quota_overage", result.over_quota_overage),
        FieldRow::new(
            "characters",
            or_dash(result.charged_counter.map(|c| c.characters)),
        ),
        FieldRow::new(
            "requests",
            or_dash(result.charged_counter.map(|c| c.requests)),
        ),
    ];
    print_detail(&result, fields, ctx.format)
}
