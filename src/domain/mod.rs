//! Domain types shared by services, repositories and the HTTP layer.

pub mod address;
pub mod money;
pub mod transaction;
pub mod user;

pub use address::{Address, AddressError, Network, PhoneNumber};
pub use money::{Currency, Money, MoneyError};
pub use transaction::{
    NewTransaction, PaymentMethod, StatusPatch, Transaction, TransactionStatus, TransactionType,
    DEFAULT_REQUIRED_CONFIRMATIONS,
};
pub use user::{AccountType, KycStatus, KycSubmission, NewUser, ProfileUpdate, User};
