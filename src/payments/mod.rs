//! Mobile-money provider integration.

pub mod error;
pub mod providers;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use providers::mpesa::{MpesaClient, MpesaConfig, MpesaRail};
