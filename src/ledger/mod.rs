pub mod balance;
pub mod models;
pub mod repository;

pub use models::{LedgerEntry, LedgerEntryWithBalance, TransactionStatus, TransactionType};
pub use repository::LedgerRepository;
