/*!
 * # Caller identity
 *
 * Token issuance and verification live outside this crate. Callers arrive already
 * authenticated and are handed to every service method as an explicit
 * `CallerIdentity` value rather than read from request-scoped state.
 */

use crate::errors::ServiceError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{Display, EnumString};

/// Marketplace role carried by an authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum UserRole {
    Customer,
    Supplier,
    Admin,
}

/// Authenticated caller: numeric user id plus role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub user_id: i64,
    pub role: UserRole,
}

impl CallerIdentity {
    pub fn new(user_id: i64, role: UserRole) -> Self {
        Self { user_id, role }
    }

    pub fn customer(user_id: i64) -> Self {
        Self::new(user_id, UserRole::Customer)
    }

    pub fn supplier(user_id: i64) -> Self {
        Self::new(user_id, UserRole::Supplier)
    }

    pub fn admin(user_id: i64) -> Self {
        Self::new(user_id, UserRole::Admin)
    }

    /// Builds an identity from the raw role claim.
    pub fn parse(user_id: i64, role: &str) -> Result<Self, ServiceError> {
        Ok(Self::new(user_id, parse_role(role)?))
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Fails with `Forbidden` unless the caller holds `role`.
    pub fn require_role(&self, role: UserRole) -> Result<(), ServiceError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "operation requires the {} role, caller {} is {}",
                role, self.user_id, self.role
            )))
        }
    }
}

pub fn parse_role(role: &str) -> Result<UserRole, ServiceError> {
    UserRole::from_str(role.trim()).map_err(|_| ServiceError::UnknownRole(role.to_string()))
}
