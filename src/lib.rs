//! Marketplace API Library
//!
//! Checkout-to-fulfillment core of a multi-supplier marketplace: per-customer carts
//! grouped by supplier, atomic checkout into one order per supplier, signed payment
//! gateway requests with a pending-payment cache, and two-party order contracts.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod directory;
pub mod entities;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod repositories;
pub mod services;

pub use errors::ServiceError;
pub use services::AppServices;
