use crate::entities::{order, order_line};
use serde::Serialize;

/// Order line with catalog data joined in after the fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderLineDetails {
    #[serde(flatten)]
    pub line: order_line::Model,
    pub product_name: Option<String>,
    pub product_image: Option<String>,
}

/// Order as shown in customer and supplier listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: order::Model,
    pub supplier_name: Option<String>,
    pub total: i64,
    pub lines: Vec<OrderLineDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedOrder {
    pub order_id: i64,
    pub supplier_id: i64,
    pub total: i64,
    pub line_count: usize,
}

/// Outcome of a successful checkout: every order that was created, in cart order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutReceipt {
    pub customer_id: i64,
    pub orders: Vec<PlacedOrder>,
}

impl CheckoutReceipt {
    pub fn order_ids(&self) -> Vec<i64> {
        self.orders.iter().map(|o| o.order_id).collect()
    }
}
