pub mod cart_line;
pub mod cart_supplier_group;
pub mod contract;
pub mod order;
pub mod order_line;

pub use contract::ContractStatus;
pub use order::OrderStatus;
