//! Catalog and supplier registry lookups.
//!
//! Both registries are owned elsewhere; this crate only reads from them. Lookups are
//! batched: callers pass the distinct id set of a result page and get a map back, so
//! enrichment costs one call per registry regardless of the number of rows.

use crate::errors::ServiceError;
use crate::models::SupplierTerms;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierProfile {
    pub id: i64,
    pub name: String,
    #[serde(flatten)]
    pub terms: SupplierTerms,
}

#[async_trait]
pub trait CatalogDirectory: Send + Sync {
    /// Products for the given ids; unknown ids are absent from the map.
    async fn products(&self, ids: &[i64]) -> Result<HashMap<i64, ProductSummary>, ServiceError>;
}

#[async_trait]
pub trait SupplierDirectory: Send + Sync {
    /// Suppliers for the given ids; unknown ids are absent from the map.
    async fn suppliers(&self, ids: &[i64])
        -> Result<HashMap<i64, SupplierProfile>, ServiceError>;

    async fn supplier(&self, id: i64) -> Result<SupplierProfile, ServiceError> {
        self.suppliers(&[id])
            .await?
            .remove(&id)
            .ok_or_else(|| ServiceError::NotFound(format!("supplier {}", id)))
    }
}

/// JSON layout accepted by [`InMemoryDirectory::from_json_file`].
#[derive(Debug, Default, Deserialize)]
pub struct DirectoryFile {
    #[serde(default)]
    pub products: Vec<ProductSummary>,
    #[serde(default)]
    pub suppliers: Vec<SupplierProfile>,
}

/// Directory held in memory; used by the CLI and by tests.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    products: RwLock<HashMap<i64, ProductSummary>>,
    suppliers: RwLock<HashMap<i64, SupplierProfile>>,
    product_lookups: AtomicUsize,
    supplier_lookups: AtomicUsize,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file_contents(file: DirectoryFile) -> Self {
        let mut dir = Self::new();
        for product in file.products {
            dir = dir.with_product(product);
        }
        for supplier in file.suppliers {
            dir = dir.with_supplier(supplier);
        }
        dir
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            ServiceError::ConfigError(format!("cannot read directory file {}: {}", path.display(), e))
        })?;
        let file: DirectoryFile = serde_json::from_str(&raw)?;
        info!(
            products = file.products.len(),
            suppliers = file.suppliers.len(),
            "loaded directory from {}",
            path.display()
        );
        Ok(Self::from_file_contents(file))
    }

    pub fn with_product(mut self, product: ProductSummary) -> Self {
        self.products.get_mut().insert(product.id, product);
        self
    }

    pub fn with_supplier(mut self, supplier: SupplierProfile) -> Self {
        self.suppliers.get_mut().insert(supplier.id, supplier);
        self
    }

    pub async fn upsert_supplier(&self, supplier: SupplierProfile) {
        self.suppliers.write().await.insert(supplier.id, supplier);
    }

    /// Number of batched catalog calls served so far.
    pub fn product_lookups(&self) -> usize {
        self.product_lookups.load(Ordering::Relaxed)
    }

    pub fn supplier_lookups(&self) -> usize {
        self.supplier_lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CatalogDirectory for InMemoryDirectory {
    async fn products(&self, ids: &[i64]) -> Result<HashMap<i64, ProductSummary>, ServiceError> {
        self.product_lookups.fetch_add(1, Ordering::Relaxed);
        debug!(count = ids.len(), "catalog lookup");
        let products = self.products.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| products.get(id).map(|p| (*id, p.clone())))
            .collect())
    }
}

#[async_trait]
impl SupplierDirectory for InMemoryDirectory {
    async fn suppliers(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<i64, SupplierProfile>, ServiceError> {
        self.supplier_lookups.fetch_add(1, Ordering::Relaxed);
        debug!(count = ids.len(), "supplier lookup");
        let suppliers = self.suppliers.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| suppliers.get(id).map(|s| (*id, s.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_file_flattens_supplier_terms() {
        let file: DirectoryFile = serde_json::from_str(
            r#"{
                "products": [{"id": 1, "name": "Olive oil", "image": "oil.png"}],
                "suppliers": [{"id": 7, "name": "Farm", "min_order_amount": 1000,
                               "free_delivery_amount": 5000, "delivery_fee": 300}]
            }"#,
        )
        .unwrap();
        let dir = InMemoryDirectory::from_file_contents(file);

        let supplier = dir.supplier(7).await.unwrap();
        assert_eq!(supplier.terms.min_order_amount, 1000);
        assert!(dir.supplier(8).await.unwrap_err().is_not_found());

        let products = dir.products(&[1, 2]).await.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(dir.product_lookups(), 1);
    }

    #[tokio::test]
    async fn loads_from_a_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directory.json");
        std::fs::write(
            &path,
            r#"{"suppliers": [{"id": 3, "name": "Mill", "min_order_amount": 200}]}"#,
        )
        .unwrap();

        let loaded = InMemoryDirectory::from_json_file(&path).await.unwrap();
        let supplier = loaded.supplier(3).await.unwrap();
        assert_eq!(supplier.terms.min_order_amount, 200);
        assert_eq!(supplier.terms.delivery_fee, 0);

        let missing = InMemoryDirectory::from_json_file(dir.path().join("absent.json")).await;
        assert!(matches!(missing, Err(ServiceError::ConfigError(_))));
    }
}
