pub mod cart;
pub mod contract;
pub mod order;
pub mod payment;

pub use cart::{
    AddCartLine, Cart, CartLine, CartSummary, NewOrder, NewOrderLine, RemoveCartLine,
    SupplierGroup, SupplierGroups, SupplierTerms,
};
pub use contract::{NewContract, SignContractRequest};
pub use order::{CheckoutReceipt, OrderDetails, OrderLineDetails, PlacedOrder};
pub use payment::{
    CartSnapshot, CheckoutCallback, CheckoutResult, CommitCheckout, PaymentIntent, PaymentStatus,
    PendingPaymentOrder, ReconcileOutcome, SnapshotLine,
};
