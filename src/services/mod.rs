pub mod cart;
pub mod checkout;
pub mod contracts;
pub mod orders;
pub mod payments;

use crate::{
    cache::{InMemoryPaymentOrderCache, PaymentOrderCache, RedisPaymentOrderCache},
    config::AppConfig,
    db::{self, DbPool},
    directory::{CatalogDirectory, SupplierDirectory},
    errors::ServiceError,
    gateway::{GatewayClient, PaymentGateway},
};
use std::sync::Arc;
use tracing::{info, warn};

pub use cart::CartService;
pub use checkout::CheckoutService;
pub use contracts::{ContractService, SigningPolicy};
pub use orders::OrderService;
pub use payments::PaymentService;

/// External collaborators the services are wired against.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogDirectory>,
    pub suppliers: Arc<dyn SupplierDirectory>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub payment_cache: Arc<dyn PaymentOrderCache>,
}

/// The full service graph, built once at startup in dependency order.
#[derive(Clone)]
pub struct AppServices {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub cart: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
    pub payments: Arc<PaymentService>,
    pub contracts: Arc<ContractService>,
    pub payment_cache: Arc<dyn PaymentOrderCache>,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, config: Arc<AppConfig>, deps: Collaborators) -> Self {
        let cart = Arc::new(CartService::new(db.clone(), deps.suppliers.clone()));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            deps.catalog.clone(),
            deps.suppliers.clone(),
            config.orders.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(db.clone(), orders.clone()));
        let payments = Arc::new(PaymentService::new(
            db.clone(),
            orders.clone(),
            deps.gateway.clone(),
            deps.payment_cache.clone(),
            config.payment_gateway.currency.clone(),
        ));
        let contracts = Arc::new(ContractService::new(
            db.clone(),
            SigningPolicy {
                allow_customer_first: config.contracts.allow_customer_first_signing,
            },
        ));

        Self {
            db,
            config,
            cart,
            orders,
            checkout,
            payments,
            contracts,
            payment_cache: deps.payment_cache,
        }
    }

    /// Connects to the database (migrating when configured), builds the gateway client
    /// and payment cache from `config`, then wires the services.
    pub async fn from_config(
        config: AppConfig,
        catalog: Arc<dyn CatalogDirectory>,
        suppliers: Arc<dyn SupplierDirectory>,
    ) -> Result<Self, ServiceError> {
        let pool = db::establish_connection_from_app_config(&config).await?;
        if config.auto_migrate {
            db::run_migrations(&pool).await?;
        }

        let gateway: Arc<dyn PaymentGateway> =
            Arc::new(GatewayClient::new(config.payment_gateway.clone())?);
        let payment_cache = build_payment_cache(&config).await?;

        Ok(Self::new(
            Arc::new(pool),
            Arc::new(config),
            Collaborators {
                catalog,
                suppliers,
                gateway,
                payment_cache,
            },
        ))
    }
}

/// Redis when configured and reachable; otherwise the in-process cache. Outside
/// development an unreachable Redis is an error.
pub async fn build_payment_cache(
    config: &AppConfig,
) -> Result<Arc<dyn PaymentOrderCache>, ServiceError> {
    let ttl = config.payment_cache_ttl();
    if !config.payment_cache.backend.eq_ignore_ascii_case("redis") {
        return Ok(Arc::new(InMemoryPaymentOrderCache::new(ttl)));
    }

    let redis = RedisPaymentOrderCache::new(
        config.redis_url(),
        config.payment_cache.namespace.clone(),
        ttl,
    )?;
    match redis.ping().await {
        Ok(()) => {
            info!("payment order cache backed by redis");
            Ok(Arc::new(redis))
        }
        Err(e) if config.is_development() => {
            warn!(error = %e, "redis unavailable; using in-memory payment order cache");
            Ok(Arc::new(InMemoryPaymentOrderCache::new(ttl)))
        }
        Err(e) => Err(e),
    }
}
