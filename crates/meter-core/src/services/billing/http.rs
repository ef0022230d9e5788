//! HTTP billing provider
//!
//! JSON client for a billing API with basic authentication:
//!
//! - `GET  {base}/customers/{code}` returns a [`CustomerAccount`]
//! - `POST {base}/customers/{code}/usage` with `{"quantity": units}` returns
//!   the updated [`CustomerAccount`]

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Serialize;

use super::provider::{BillingError, BillingProvider, CustomerAccount};
use crate::config::BillingConfig;

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Serialize)]
struct UsageReportBody {
    quantity: f64,
}

/// [`BillingProvider`] over HTTP
pub struct HttpBillingProvider {
    client: Client,
    base_url: Url,
    user: Option<String>,
    api_key: Option<String>,
}

impl HttpBillingProvider {
    /// Build a provider from configuration; fails without a base URL
    pub fn new(config: &BillingConfig) -> Result<Self, BillingError> {
        let raw = config
            .base_url
            .as_deref()
            .ok_or_else(|| BillingError::NotConfigured("METER_BILLING_URL is not set".to_string()))?;
        let base_url = Url::parse(raw)
            .map_err(|e| BillingError::NotConfigured(format!("invalid METER_BILLING_URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BillingError::NotConfigured(format!(
                "METER_BILLING_URL cannot be a base URL: {}",
                raw
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url,
            user: config.user.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// `{base}/customers/{code}/{tail...}` with every segment percent-encoded
    fn customer_url(&self, customer_code: &str, tail: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("customers")
                .push(customer_code)
                .extend(tail);
        }
        url
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .header("Accept", "application/json")
            .header("User-Agent", "meter");
        match &self.user {
            Some(user) => builder.basic_auth(user, self.api_key.as_deref()),
            None => builder,
        }
    }

    async fn parse_account(
        customer_code: &str,
        response: Response,
    ) -> Result<CustomerAccount, BillingError> {
        let status = response.status();
        log::debug!("[meter:reconcile] billing API response status: {}", status);

        if status == 401 || status == 403 {
            return Err(BillingError::Unauthorized(format!(
                "billing API rejected credentials (HTTP {})",
                status
            )));
        }
        if status == 404 {
            return Err(BillingError::CustomerNotFound(customer_code.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("[meter:reconcile] billing API error: HTTP {} - {}", status, body);
            return Err(BillingError::ApiError(format!(
                "API returned HTTP {}: {}",
                status, body
            )));
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl BillingProvider for HttpBillingProvider {
    fn provider_id(&self) -> &'static str {
        "http"
    }

    async fn get_customer(&self, customer_code: &str) -> Result<CustomerAccount, BillingError> {
        let response = self
            .authorized(self.client.get(self.customer_url(customer_code, &[])))
            .send()
            .await?;
        Self::parse_account(customer_code, response).await
    }

    async fn report_usage(
        &self,
        customer_code: &str,
        units: f64,
    ) -> Result<CustomerAccount, BillingError> {
        let url = self.customer_url(customer_code, &["usage"]);
        let response = self
            .authorized(self.client.post(url))
            .json(&UsageReportBody { quantity: units })
            .send()
            .await?;
        Self::parse_account(customer_code, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_base_url() {
        assert!(matches!(
            HttpBillingProvider::new(&BillingConfig::default()),
            Err(BillingError::NotConfigured(_))
        ));
        let bad = BillingConfig {
            base_url: Some("not a url".to_string()),
            ..BillingConfig::default()
        };
        assert!(matches!(
            HttpBillingProvider::new(&bad),
            Err(BillingError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_customer_url() {
        let config = BillingConfig {
            base_url: Some("https://billing.example.com/api/".to_string()),
            ..BillingConfig::default()
        };
        let provider = HttpBillingProvider::new(&config).unwrap();
        assert_eq!(
            provider.customer_url("a b/c", &[]).as_str(),
            "https://billing.example.com/api/customers/a%20b%2Fc"
        );
        assert_eq!(
            provider.customer_url("c1", &["usage"]).as_str(),
            "https://billing.example.com/api/customers/c1/usage"
        );
        assert_eq!(provider.provider_id(), "http");
    }
}
