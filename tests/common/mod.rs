#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use marketplace_api::{
    auth::CallerIdentity,
    cache::InMemoryPaymentOrderCache,
    config::AppConfig,
    db::{self, DbConfig},
    directory::{InMemoryDirectory, ProductSummary, SupplierProfile},
    errors::ServiceError,
    gateway::PaymentGateway,
    models::{AddCartLine, CheckoutResult, PaymentIntent, SupplierTerms},
    services::{AppServices, Collaborators},
};

pub const CUSTOMER: i64 = 1;
pub const SUPPLIER_A: i64 = 100;
pub const SUPPLIER_B: i64 = 200;

/// Gateway double that records every intent and answers with a fixed checkout page.
#[derive(Default)]
pub struct RecordingGateway {
    pub intents: Mutex<Vec<PaymentIntent>>,
}

impl RecordingGateway {
    pub fn recorded(&self) -> Vec<PaymentIntent> {
        self.intents.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn request_payment(&self, intent: &PaymentIntent) -> Result<CheckoutResult, ServiceError> {
        self.intents.lock().unwrap().push(intent.clone());
        Ok(CheckoutResult {
            checkout_url: format!("https://pay.test/checkout/{}", intent.order_ref),
            payment_id: format!("pay-{}", intent.order_ref),
            response_status: "success".to_string(),
        })
    }
}

/// Helper harness wiring every service against an in-memory SQLite database.
pub struct TestApp {
    pub services: AppServices,
    pub directory: Arc<InMemoryDirectory>,
    pub cache: Arc<InMemoryPaymentOrderCache>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_gateway(Arc::new(RecordingGateway::default()), AppConfig::new(
            "sqlite::memory:".to_string(),
            "redis://127.0.0.1:6379".to_string(),
            "test".to_string(),
        ))
        .await
    }

    pub async fn with_gateway(gateway: Arc<dyn PaymentGateway>, config: AppConfig) -> Self {
        let pool = db::establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .expect("failed to open in-memory database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let directory = Arc::new(
            InMemoryDirectory::new()
                .with_supplier(supplier(SUPPLIER_A, "Acme Farms", 1000))
                .with_supplier(supplier(SUPPLIER_B, "Bolt Bakery", 500))
                .with_product(product(1, "Apples"))
                .with_product(product(2, "Pears"))
                .with_product(product(3, "Rye bread")),
        );
        let cache = Arc::new(InMemoryPaymentOrderCache::new(config.payment_cache_ttl()));

        let services = AppServices::new(
            Arc::new(pool),
            Arc::new(config),
            Collaborators {
                catalog: directory.clone(),
                suppliers: directory.clone(),
                gateway,
                payment_cache: cache.clone(),
            },
        );

        Self {
            services,
            directory,
            cache,
        }
    }

    pub fn customer(&self) -> CallerIdentity {
        CallerIdentity::customer(CUSTOMER)
    }

    pub async fn add_line(
        &self,
        supplier_id: i64,
        product_id: i64,
        quantity: i32,
        price: i64,
    ) -> Result<(), ServiceError> {
        self.services
            .cart
            .add_or_update_line(
                &self.customer(),
                AddCartLine {
                    product_id,
                    supplier_id,
                    quantity,
                    price,
                },
            )
            .await
            .map(|_| ())
    }
}

pub fn supplier(id: i64, name: &str, min_order_amount: i64) -> SupplierProfile {
    SupplierProfile {
        id,
        name: name.to_string(),
        terms: SupplierTerms {
            min_order_amount,
            free_delivery_amount: 5000,
            delivery_fee: 250,
        },
    }
}

pub fn product(id: i64, name: &str) -> ProductSummary {
    ProductSummary {
        id,
        name: name.to_string(),
        image: None,
    }
}
