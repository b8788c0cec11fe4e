//! Data access for carts, orders and contracts.
//!
//! Repositories hold no connection of their own. Every method takes the connection to
//! run on, so the same call works against the pool or inside a `UnitOfWork`.

pub mod cart_repository;
pub mod contract_repository;
pub mod order_repository;

pub use cart_repository::CartRepository;
pub use contract_repository::ContractRepository;
pub use order_repository::OrderRepository;
