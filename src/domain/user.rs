use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Personal,
    Merchant,
    Admin,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Personal => "personal",
            AccountType::Merchant => "merchant",
            AccountType::Admin => "admin",
        }
    }
}

impl FromStr for AccountType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "personal" => Ok(AccountType::Personal),
            "merchant" => Ok(AccountType::Merchant),
            "admin" => Ok(AccountType::Admin),
            other => Err(format!("unknown account type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    Pending,
    Submitted,
    UnderReview,
    Approved,
    Rejected,
    Expired,
}

impl KycStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::Pending => "pending",
            KycStatus::Submitted => "submitted",
            KycStatus::UnderReview => "under_review",
            KycStatus::Approved => "approved",
            KycStatus::Rejected => "rejected",
            KycStatus::Expired => "expired",
        }
    }

    /// Whether the user may (re)submit documents from this status.
    pub fn accepts_submission(&self) -> bool {
        matches!(
            self,
            KycStatus::Pending | KycStatus::Rejected | KycStatus::Expired
        )
    }
}

impl FromStr for KycStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "pending" => Ok(KycStatus::Pending),
            "submitted" => Ok(KycStatus::Submitted),
            "under_review" => Ok(KycStatus::UnderReview),
            "approved" => Ok(KycStatus::Approved),
            "rejected" => Ok(KycStatus::Rejected),
            "expired" => Ok(KycStatus::Expired),
            other => Err(format!("unknown kyc status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub phone_number: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub account_type: AccountType,
    pub kyc_status: KycStatus,
    pub kyc_document_type: Option<String>,
    pub kyc_document_number: Option<String>,
    pub is_active: bool,
    pub country: String,
    pub preferred_currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.account_type == AccountType::Admin
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub phone_number: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub account_type: AccountType,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub preferred_currency: Option<String>,
}

#[derive(Debug, Clone)]
pub struct KycSubmission {
    pub document_type: String,
    pub document_number: String,
}
