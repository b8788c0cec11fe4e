//! Two-party contract signing on placed orders.

mod common;

use assert_matches::assert_matches;
use common::{TestApp, CUSTOMER, SUPPLIER_A};
use marketplace_api::{
    auth::CallerIdentity,
    config::AppConfig,
    entities::ContractStatus,
    errors::ServiceError,
    models::{NewContract, SignContractRequest},
};
use std::sync::Arc;

async fn order_with_contract(app: &TestApp) -> (i64, i64) {
    app.add_line(SUPPLIER_A, 1, 2, 600).await.unwrap();
    let receipt = app.services.checkout.checkout(&app.customer()).await.unwrap();
    let order_id = receipt.orders[0].order_id;

    let contract = app
        .services
        .contracts
        .create_contract(
            &CallerIdentity::supplier(SUPPLIER_A),
            NewContract {
                order_id,
                supplier_id: SUPPLIER_A,
                customer_id: CUSTOMER,
                content: "Delivery within three days of the order date.".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(contract.status, ContractStatus::Created);
    (order_id, contract.id)
}

fn signature(contract_id: i64, value: &str) -> SignContractRequest {
    SignContractRequest {
        contract_id,
        signature: value.to_string(),
    }
}

#[tokio::test]
async fn supplier_then_customer_completes_the_contract() {
    let app = TestApp::new().await;
    let (_, contract_id) = order_with_contract(&app).await;
    let contracts = &app.services.contracts;

    let signed = contracts
        .sign(&CallerIdentity::supplier(SUPPLIER_A), signature(contract_id, "acme"))
        .await
        .unwrap();
    assert_eq!(signed.status, ContractStatus::SignedBySupplier);
    assert!(signed.signed_at.is_none());

    let completed = contracts
        .sign(&app.customer(), signature(contract_id, "jane"))
        .await
        .unwrap();
    assert_eq!(completed.status, ContractStatus::Completed);
    assert!(completed.signed_at.is_some());
    assert_eq!(completed.supplier_signature.as_deref(), Some("acme"));
    assert_eq!(completed.customer_signature.as_deref(), Some("jane"));

    assert_matches!(
        contracts
            .sign(&app.customer(), signature(contract_id, "again"))
            .await,
        Err(ServiceError::InvalidOperation(_))
    );
    let stored = contracts.get_contract(&app.customer(), contract_id).await.unwrap();
    assert_eq!(stored.status, ContractStatus::Completed);
    assert_eq!(stored.customer_signature, completed.customer_signature);
}

#[tokio::test]
async fn customer_cannot_sign_first_by_default() {
    let app = TestApp::new().await;
    let (_, contract_id) = order_with_contract(&app).await;

    let err = app
        .services
        .contracts
        .sign(&app.customer(), signature(contract_id, "jane"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PreconditionFailed(msg) if msg == "supplier has not signed yet");

    let stored = app
        .services
        .contracts
        .get_contract(&app.customer(), contract_id)
        .await
        .unwrap();
    assert_eq!(stored.status, ContractStatus::Created);
    assert!(stored.customer_signature.is_none());
}

#[tokio::test]
async fn customer_first_signing_when_enabled() {
    let mut config = AppConfig::new(
        "sqlite::memory:".to_string(),
        "redis://127.0.0.1:6379".to_string(),
        "test".to_string(),
    );
    config.contracts.allow_customer_first_signing = true;
    let app = TestApp::with_gateway(Arc::new(common::RecordingGateway::default()), config).await;
    let (_, contract_id) = order_with_contract(&app).await;

    let signed = app
        .services
        .contracts
        .sign(&app.customer(), signature(contract_id, "jane"))
        .await
        .unwrap();
    assert_eq!(signed.status, ContractStatus::SignedByCustomer);

    let completed = app
        .services
        .contracts
        .sign(&CallerIdentity::supplier(SUPPLIER_A), signature(contract_id, "acme"))
        .await
        .unwrap();
    assert_eq!(completed.status, ContractStatus::Completed);
}

#[tokio::test]
async fn signing_requests_are_validated() {
    let app = TestApp::new().await;
    let (_, contract_id) = order_with_contract(&app).await;

    assert_matches!(
        app.services
            .contracts
            .sign(&CallerIdentity::supplier(SUPPLIER_A), signature(contract_id, ""))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        app.services
            .contracts
            .sign(&CallerIdentity::supplier(SUPPLIER_A), signature(contract_id + 100, "x"))
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        app.services
            .contracts
            .sign(&CallerIdentity::supplier(SUPPLIER_A + 1), signature(contract_id, "x"))
            .await,
        Err(ServiceError::Forbidden(_))
    );
    assert_matches!(
        CallerIdentity::parse(SUPPLIER_A, "courier"),
        Err(ServiceError::UnknownRole(_))
    );
}

#[tokio::test]
async fn one_contract_per_order_with_matching_parties() {
    let app = TestApp::new().await;
    let (order_id, _) = order_with_contract(&app).await;
    let supplier = CallerIdentity::supplier(SUPPLIER_A);

    assert_matches!(
        app.services
            .contracts
            .create_contract(
                &supplier,
                NewContract {
                    order_id,
                    supplier_id: SUPPLIER_A,
                    customer_id: CUSTOMER,
                    content: "second".to_string(),
                },
            )
            .await,
        Err(ServiceError::Conflict(_))
    );
    assert_matches!(
        app.services
            .contracts
            .create_contract(
                &supplier,
                NewContract {
                    order_id,
                    supplier_id: SUPPLIER_A,
                    customer_id: CUSTOMER + 7,
                    content: "wrong customer".to_string(),
                },
            )
            .await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn contracts_are_listed_for_both_parties_only() {
    let app = TestApp::new().await;
    let (_, contract_id) = order_with_contract(&app).await;
    let contracts = &app.services.contracts;

    let supplier = CallerIdentity::supplier(SUPPLIER_A);
    let stranger = CallerIdentity::customer(4242);

    let for_customer = contracts.contracts_by_user(&app.customer(), CUSTOMER).await.unwrap();
    let for_supplier = contracts.contracts_by_user(&supplier, SUPPLIER_A).await.unwrap();
    assert_eq!(for_customer.len(), 1);
    assert_eq!(for_supplier[0].id, contract_id);
    assert!(contracts.contracts_by_user(&stranger, 4242).await.unwrap().is_empty());

    assert_matches!(
        contracts.contracts_by_user(&stranger, CUSTOMER).await,
        Err(ServiceError::Forbidden(_))
    );
    let as_admin = contracts
        .contracts_by_user(&CallerIdentity::admin(1), SUPPLIER_A)
        .await
        .unwrap();
    assert_eq!(as_admin.len(), 1);

    assert_matches!(
        contracts
            .get_contract(&stranger, contract_id)
            .await,
        Err(ServiceError::Forbidden(_))
    );
}
