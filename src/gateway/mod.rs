//! Client for the hosted-checkout payment gateway.
//!
//! Requests are authenticated with a SHA-1 digest over the sorted, non-empty request
//! fields prefixed by the merchant password (see [`signature`]).

pub mod client;
pub mod signature;

pub use client::{GatewayClient, PaymentGateway, PaymentRequest};
pub use signature::{sign, sign_fields};
