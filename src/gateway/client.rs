use crate::config::PaymentGatewayConfig;
use crate::errors::ServiceError;
use crate::gateway::signature::sign;
use crate::models::{CheckoutResult, PaymentIntent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const FAILURE_STATUS: &str = "failure";

/// Outbound checkout-url request, sent as `{"request": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub order_id: String,
    pub merchant_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub order_desc: String,
    #[serde(default)]
    pub signature: String,
    pub amount: String,
    pub currency: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_callback_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sender_email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub product_id: String,
}

impl PaymentRequest {
    /// The gateway rejects requests missing any of these.
    pub fn check_required(&self) -> Result<(), ServiceError> {
        let required = [
            ("merchant_id", &self.merchant_id),
            ("order_id", &self.order_id),
            ("amount", &self.amount),
            ("currency", &self.currency),
        ];
        match required.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((name, _)) => Err(ServiceError::ValidationError(format!(
                "payment request field {} is required",
                name
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    request: &'a PaymentRequest,
}

#[derive(Deserialize)]
struct ResponseEnvelope {
    response: HashMap<String, Value>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Requests a hosted checkout page for `intent`. Never retried here.
    async fn request_payment(&self, intent: &PaymentIntent) -> Result<CheckoutResult, ServiceError>;
}

/// HTTP client for the signed checkout-url API
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    config: PaymentGatewayConfig,
}

impl GatewayClient {
    pub fn new(config: PaymentGatewayConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    /// Builds and signs the request for `intent` using the merchant settings.
    pub fn build_request(&self, intent: &PaymentIntent) -> Result<PaymentRequest, ServiceError> {
        let currency = if intent.currency.is_empty() {
            self.config.currency.clone()
        } else {
            intent.currency.clone()
        };

        let mut request = PaymentRequest {
            order_id: intent.order_ref.clone(),
            merchant_id: self.config.merchant_id.clone(),
            order_desc: intent.description.clone(),
            signature: String::new(),
            amount: intent.amount.to_string(),
            currency,
            response_url: self.config.response_url.clone(),
            server_callback_url: self.config.server_callback_url.clone(),
            sender_email: intent.sender_email.clone().unwrap_or_default(),
            language: self.config.language.clone(),
            product_id: intent.product_id.clone().unwrap_or_default(),
        };
        if intent.amount <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "payment amount must be positive, got {}",
                intent.amount
            )));
        }
        request.check_required()?;
        request.signature = sign(&self.config.merchant_password, &request)?;
        Ok(request)
    }
}

#[async_trait]
impl PaymentGateway for GatewayClient {
    #[instrument(skip(self, intent), fields(order_ref = %intent.order_ref, amount = intent.amount))]
    async fn request_payment(&self, intent: &PaymentIntent) -> Result<CheckoutResult, ServiceError> {
        let request = self.build_request(intent)?;
        debug!("sending checkout-url request to {}", self.config.endpoint);

        let response = self
            .http
            .post(&self.config.endpoint)
            .json(&RequestEnvelope { request: &request })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "payment gateway returned an error status");
            return Err(ServiceError::ExternalServiceError(format!(
                "payment gateway returned {}: {}",
                status, body
            )));
        }

        let envelope: ResponseEnvelope = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("malformed payment gateway response: {}", e))
        })?;
        let result = parse_response(envelope.response)?;
        info!(payment_id = %result.payment_id, "checkout url issued");
        Ok(result)
    }
}

fn field(response: &HashMap<String, Value>, name: &str) -> Option<String> {
    match response.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Turns the flat response map into a `CheckoutResult`, naming the first missing field.
fn parse_response(response: HashMap<String, Value>) -> Result<CheckoutResult, ServiceError> {
    if field(&response, "response_status").as_deref() == Some(FAILURE_STATUS) {
        let message = field(&response, "error_message").unwrap_or_else(|| "unknown error".into());
        return Err(match field(&response, "error_code") {
            Some(code) => ServiceError::PaymentFailed(format!("{} (code {})", message, code)),
            None => ServiceError::PaymentFailed(message),
        });
    }

    let require = |name: &str| {
        field(&response, name).ok_or_else(|| {
            ServiceError::ExternalServiceError(format!(
                "payment gateway response is missing {}",
                name
            ))
        })
    };

    Ok(CheckoutResult {
        checkout_url: require("checkout_url")?,
        payment_id: require("payment_id")?,
        response_status: require("response_status")?,
    })
}
