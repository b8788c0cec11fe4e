use crate::entities::OrderStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the caller wants charged; turned into a signed gateway request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Merchant-side order reference, `{order_id}_{unix_millis}`
    pub order_ref: String,
    /// Minor units
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub sender_email: Option<String>,
    pub product_id: Option<String>,
}

/// Gateway answer to a checkout-url request. Not persisted in the primary store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutResult {
    pub checkout_url: String,
    pub payment_id: String,
    pub response_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub product_id: i64,
    pub quantity: i32,
    pub price: i64,
}

/// Copy of what was being paid for at the moment payment was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub customer_id: i64,
    pub supplier_id: i64,
    pub order_id: i64,
    pub amount: i64,
    pub currency: String,
    pub lines: Vec<SnapshotLine>,
}

/// Pending payment tracked in the payment order cache until the webhook settles it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPaymentOrder {
    pub id: String,
    pub cart: CartSnapshot,
    pub checkout: CheckoutResult,
    pub created_at: DateTime<Utc>,
}

/// Webhook body posted by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutCallback {
    pub order_id: String,
    pub order_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Success,
    Failed,
    Other(String),
}

impl PaymentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => Self::Success,
            "failed" => Self::Failed,
            _ => Self::Other(raw.to_string()),
        }
    }

    /// Order status a final payment outcome moves a pending order to.
    pub fn target_order_status(&self) -> Option<OrderStatus> {
        match self {
            Self::Success => Some(OrderStatus::InProgress),
            Self::Failed => Some(OrderStatus::Cancelled),
            Self::Other(_) => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failed => f.write_str("failed"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCheckout {
    pub order_id: String,
    pub payment_status: PaymentStatus,
}

impl From<CheckoutCallback> for CommitCheckout {
    fn from(cb: CheckoutCallback) -> Self {
        Self {
            payment_status: PaymentStatus::parse(&cb.order_status),
            order_id: cb.order_id,
        }
    }
}

/// What a webhook did to the order it refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied {
        order_id: i64,
        status: OrderStatus,
    },
    /// Order had already left `Pending`; nothing changed.
    AlreadySettled {
        order_id: i64,
        status: OrderStatus,
    },
    /// Non-final payment status; the order is untouched.
    Ignored {
        order_id: i64,
        payment_status: String,
    },
}
