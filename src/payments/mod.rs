pub mod gateway;
pub mod models;
pub mod phone;
pub mod reconciler;
pub mod store;

pub use gateway::{PaymentGateway, PaystackGateway};
pub use reconciler::{PaymentReconciler, PaymentSettings};
pub use store::PaymentStore;
