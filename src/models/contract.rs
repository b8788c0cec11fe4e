use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewContract {
    pub order_id: i64,
    pub supplier_id: i64,
    pub customer_id: i64,
    #[validate(length(min = 1, message = "contract content must not be empty"))]
    pub content: String,
}

/// Body of a signature request. Both fields are required.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SignContractRequest {
    pub contract_id: i64,
    #[validate(length(min = 1, message = "signature must not be empty"))]
    pub signature: String,
}
