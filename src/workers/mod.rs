pub mod transaction_monitor;

pub use transaction_monitor::{TransactionMonitorConfig, TransactionMonitorWorker};
