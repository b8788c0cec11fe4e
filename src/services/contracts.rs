use crate::{
    auth::{CallerIdentity, UserRole},
    db::UnitOfWork,
    entities::{contract, ContractStatus},
    errors::ServiceError,
    models::{NewContract, SignContractRequest},
    repositories::{ContractRepository, OrderRepository},
};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

/// Rules that vary per deployment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SigningPolicy {
    /// Lets a customer sign while the contract is still `Created`.
    pub allow_customer_first: bool,
}

/// Applies one signature to `contract`.
///
/// Suppliers may always sign first. Customers need the supplier's signature unless
/// the policy allows customer-first signing. Whichever party signs second completes
/// the contract and stamps `signed_at`.
pub fn apply_signature(
    mut contract: contract::Model,
    caller: &CallerIdentity,
    signature: &str,
    policy: SigningPolicy,
    now: DateTime<Utc>,
) -> Result<contract::Model, ServiceError> {
    if contract.status == ContractStatus::Completed {
        return Err(ServiceError::InvalidOperation(
            "contract is already completed".into(),
        ));
    }

    match caller.role {
        UserRole::Supplier => {
            if caller.user_id != contract.supplier_id {
                return Err(not_party(caller, &contract));
            }
            if contract.supplier_signature.is_some() {
                return Err(ServiceError::PreconditionFailed(
                    "supplier has already signed".into(),
                ));
            }
            contract.supplier_signature = Some(signature.to_string());
            contract.status = if contract.customer_signature.is_some() {
                ContractStatus::Completed
            } else {
                ContractStatus::SignedBySupplier
            };
        }
        UserRole::Customer => {
            if caller.user_id != contract.customer_id {
                return Err(not_party(caller, &contract));
            }
            if contract.customer_signature.is_some() {
                return Err(ServiceError::PreconditionFailed(
                    "customer has already signed".into(),
                ));
            }
            let supplier_signed = contract.supplier_signature.is_some();
            let may_go_first =
                contract.status == ContractStatus::Created && policy.allow_customer_first;
            if !supplier_signed && !may_go_first {
                return Err(ServiceError::PreconditionFailed(
                    "supplier has not signed yet".into(),
                ));
            }
            contract.customer_signature = Some(signature.to_string());
            contract.status = if supplier_signed {
                ContractStatus::Completed
            } else {
                ContractStatus::SignedByCustomer
            };
        }
        UserRole::Admin => {
            return Err(ServiceError::UnknownRole(format!(
                "{} is not a signing role",
                caller.role
            )))
        }
    }

    if contract.status == ContractStatus::Completed {
        contract.signed_at = Some(now);
    }
    Ok(contract)
}

fn not_party(caller: &CallerIdentity, contract: &contract::Model) -> ServiceError {
    ServiceError::Forbidden(format!(
        "user {} cannot sign contract {} as {}",
        caller.user_id, contract.id, caller.role
    ))
}

/// Contract documents attached to orders and their two-party signing
#[derive(Clone)]
pub struct ContractService {
    db: Arc<DatabaseConnection>,
    contracts: ContractRepository,
    orders: OrderRepository,
    policy: SigningPolicy,
}

impl ContractService {
    pub fn new(db: Arc<DatabaseConnection>, policy: SigningPolicy) -> Self {
        Self {
            db,
            contracts: ContractRepository::new(),
            orders: OrderRepository::new(),
            policy,
        }
    }

    /// Creates the contract for an order. The parties must match the order and an
    /// order carries at most one contract.
    #[instrument(skip(self, input), fields(order_id = input.order_id))]
    pub async fn create_contract(
        &self,
        caller: &CallerIdentity,
        input: NewContract,
    ) -> Result<contract::Model, ServiceError> {
        input.validate()?;
        let involved = caller.is_admin()
            || caller.user_id == input.supplier_id
            || caller.user_id == input.customer_id;
        if !involved {
            return Err(ServiceError::Forbidden(format!(
                "user {} is not a party to order {}",
                caller.user_id, input.order_id
            )));
        }

        let uow = UnitOfWork::begin(&self.db, "contracts.create").await?;
        let result: Result<contract::Model, ServiceError> = async {
            let conn = uow.connection()?;
            let order = self
                .orders
                .find_by_id(conn, input.order_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("order {}", input.order_id)))?;
            if order.supplier_id != input.supplier_id || order.customer_id != input.customer_id {
                return Err(ServiceError::ValidationError(format!(
                    "contract parties do not match order {}",
                    order.id
                )));
            }
            if self
                .contracts
                .find_by_order(conn, order.id)
                .await?
                .is_some()
            {
                return Err(ServiceError::Conflict(format!(
                    "order {} already has a contract",
                    order.id
                )));
            }
            self.contracts.create(conn, &input).await
        }
        .await;
        let created = uow.finish(result).await?;

        info!(contract_id = created.id, "contract created");
        Ok(created)
    }

    #[instrument(skip(self, request), fields(contract_id = request.contract_id, role = %caller.role))]
    pub async fn sign(
        &self,
        caller: &CallerIdentity,
        request: SignContractRequest,
    ) -> Result<contract::Model, ServiceError> {
        request.validate()?;

        let uow = UnitOfWork::begin(&self.db, "contracts.sign").await?;
        let result: Result<contract::Model, ServiceError> = async {
            let conn = uow.connection()?;
            let current = self
                .contracts
                .find_by_id_for_update(conn, request.contract_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("contract {}", request.contract_id))
                })?;
            let expected = current.status;
            let signed =
                apply_signature(current, caller, &request.signature, self.policy, Utc::now())?;
            self.contracts.save_signatures(conn, expected, signed).await
        }
        .await;
        let signed = uow.finish(result).await?;

        info!(status = %signed.status, "contract signed");
        Ok(signed)
    }

    pub async fn get_contract(
        &self,
        caller: &CallerIdentity,
        id: i64,
    ) -> Result<contract::Model, ServiceError> {
        let found = self
            .contracts
            .find_by_id(&*self.db, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("contract {}", id)))?;
        if !caller.is_admin() && !found.is_party(caller.user_id) {
            return Err(ServiceError::Forbidden(format!(
                "user {} is not a party to contract {}",
                caller.user_id, id
            )));
        }
        Ok(found)
    }

    /// Contracts where the user is supplier or customer, newest first. Users see their
    /// own contracts; admins may list anyone's.
    pub async fn contracts_by_user(
        &self,
        caller: &CallerIdentity,
        user_id: i64,
    ) -> Result<Vec<contract::Model>, ServiceError> {
        if !caller.is_admin() && caller.user_id != user_id {
            return Err(ServiceError::Forbidden(format!(
                "user {} cannot list contracts of user {}",
                caller.user_id, user_id
            )));
        }
        self.contracts.find_by_user(&*self.db, user_id).await
    }
}
