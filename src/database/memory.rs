//! In-process stores used with `SKIP_EXTERNALS=true` and in tests.
//!
//! They honour the same contracts as the Postgres repositories, including the
//! compare-and-set semantics of [`TransactionStore::transition`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::transaction_repository::TransactionStore;
use crate::database::user_repository::UserStore;
use crate::domain::{
    KycStatus, KycSubmission, NewTransaction, NewUser, ProfileUpdate, StatusPatch, Transaction,
    TransactionStatus, User,
};

#[derive(Default)]
pub struct InMemoryTransactionStore {
    rows: RwLock<HashMap<Uuid, Transaction>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Rewind `updated_at` so stale-detection paths can be exercised
    pub async fn backdate(&self, id: Uuid, updated_at: DateTime<Utc>) {
        if let Some(tx) = self.rows.write().await.get_mut(&id) {
            tx.updated_at = updated_at;
        }
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn create(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        let now = Utc::now();
        let tx = Transaction {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            transaction_type: new.transaction_type,
            status: TransactionStatus::Pending,
            payment_method: new.payment_method,
            amount_crypto: new.amount_crypto,
            amount_kes: new.amount_kes,
            currency: new.currency,
            to_address: new.to_address,
            from_address: new.from_address,
            blockchain_hash: None,
            mpesa_checkout_request_id: None,
            mpesa_receipt_number: None,
            network_fee: new.network_fee,
            confirmations: 0,
            required_confirmations: new.required_confirmations,
            description: new.description,
            idempotency_key: new.idempotency_key,
            error_message: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            confirmed_at: None,
        };
        self.rows.write().await.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|tx| {
                tx.mpesa_checkout_request_id.as_deref() == Some(reference)
                    || tx.blockchain_hash.as_deref() == Some(reference)
            })
            .max_by_key(|tx| tx.created_at)
            .cloned())
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let mut rows: Vec<Transaction> = self
            .rows
            .read()
            .await
            .values()
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
        patch: &StatusPatch,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let mut rows = self.rows.write().await;
        let tx = match rows.get_mut(&id) {
            Some(tx) if tx.status == from => tx,
            _ => return Ok(None),
        };

        let now = Utc::now();
        tx.status = to;
        if let Some(hash) = &patch.blockchain_hash {
            tx.blockchain_hash = Some(hash.clone());
        }
        if let Some(checkout) = &patch.mpesa_checkout_request_id {
            tx.mpesa_checkout_request_id = Some(checkout.clone());
        }
        if let Some(receipt) = &patch.mpesa_receipt_number {
            tx.mpesa_receipt_number = Some(receipt.clone());
        }
        if let Some(confirmations) = patch.confirmations {
            tx.confirmations = confirmations;
        }
        if let Some(message) = &patch.error_message {
            tx.error_message = Some(message.clone());
        }
        match to {
            TransactionStatus::Processing => tx.processed_at = Some(now),
            TransactionStatus::Confirmed => tx.confirmed_at = Some(now),
            _ => {}
        }
        tx.updated_at = now;

        Ok(Some(tx.clone()))
    }

    async fn record_confirmations(
        &self,
        id: Uuid,
        confirmations: i32,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&id) {
            Some(tx) if tx.status == TransactionStatus::Processing => {
                tx.confirmations = confirmations;
                tx.updated_at = Utc::now();
                Ok(Some(tx.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find_stale(
        &self,
        status: TransactionStatus,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let mut rows: Vec<Transaction> = self
            .rows
            .read()
            .await
            .values()
            .filter(|tx| tx.status == status && tx.updated_at < updated_before)
            .cloned()
            .collect();
        rows.sort_by_key(|tx| tx.updated_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[derive(Default)]
pub struct InMemoryUserStore {
    rows: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(&self, new: NewUser) -> Result<User, DatabaseError> {
        let mut rows = self.rows.write().await;
        let email = new.email.to_lowercase();
        if rows.values().any(|u| u.email == email) {
            return Err(DatabaseError::new(
                DatabaseErrorKind::UniqueViolation {
                    constraint: "users_email_key".to_string(),
                },
            ));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email,
            phone_number: new.phone_number,
            first_name: new.first_name,
            last_name: new.last_name,
            account_type: new.account_type,
            kyc_status: KycStatus::Pending,
            kyc_document_type: None,
            kyc_document_number: None,
            is_active: true,
            country: "Kenya".to_string(),
            preferred_currency: "KES".to_string(),
            created_at: now,
            updated_at: now,
        };
        rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list(&self, skip: i64, limit: i64) -> Result<Vec<User>, DatabaseError> {
        let mut users: Vec<User> = self.rows.read().await.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, DatabaseError> {
        let mut rows = self.rows.write().await;
        if let Some(phone) = &update.phone_number {
            if rows
                .values()
                .any(|u| u.id != id && &u.phone_number == phone)
            {
                return Err(DatabaseError::new(
                    DatabaseErrorKind::UniqueViolation {
                        constraint: "users_phone_number_key".to_string(),
                    },
                ));
            }
        }

        let Some(user) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(first_name) = &update.first_name {
            user.first_name = Some(first_name.clone());
        }
        if let Some(last_name) = &update.last_name {
            user.last_name = Some(last_name.clone());
        }
        if let Some(phone) = &update.phone_number {
            user.phone_number = phone.clone();
        }
        if let Some(currency) = &update.preferred_currency {
            user.preferred_currency = currency.clone();
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn submit_kyc(
        &self,
        id: Uuid,
        submission: &KycSubmission,
    ) -> Result<Option<User>, DatabaseError> {
        let mut rows = self.rows.write().await;
        let Some(user) = rows.get_mut(&id) else {
            return Ok(None);
        };
        user.kyc_document_type = Some(submission.document_type.clone());
        user.kyc_document_number = Some(submission.document_number.clone());
        user.kyc_status = KycStatus::Submitted;
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<User>, DatabaseError> {
        let mut rows = self.rows.write().await;
        let Some(user) = rows.get_mut(&id) else {
            return Ok(None);
        };
        user.is_active = active;
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use crate::domain::{AccountType, Currency, PaymentMethod, TransactionType};

    fn new_payment(user_id: Uuid) -> NewTransaction {
        NewTransaction {
            user_id,
            transaction_type: TransactionType::Payment,
            payment_method: PaymentMethod::UsdtTron,
            amount_crypto: Some(BigDecimal::from(5)),
            amount_kes: None,
            currency: Currency::Usdt,
            to_address: Some("TQn9Y2khEsLJW1ChVWFMSMeRDow5KcbLSE".to_string()),
            from_address: None,
            network_fee: BigDecimal::from(0),
            required_confirmations: 3,
            description: None,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn transition_only_applies_from_expected_status() {
        let store = InMemoryTransactionStore::new();
        let tx = store.create(new_payment(Uuid::new_v4())).await.unwrap();

        let patch = StatusPatch {
            blockchain_hash: Some("tron-hash".to_string()),
            ..Default::default()
        };
        let moved = store
            .transition(tx.id, TransactionStatus::Pending, TransactionStatus::Processing, &patch)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.blockchain_hash.as_deref(), Some("tron-hash"));
        assert!(moved.processed_at.is_some());

        let again = store
            .transition(
                tx.id,
                TransactionStatus::Pending,
                TransactionStatus::Failed,
                &StatusPatch::default(),
            )
            .await
            .unwrap();
        assert!(again.is_none());

        let found = store.find_by_reference("tron-hash").await.unwrap().unwrap();
        assert_eq!(found.id, tx.id);
    }

    #[tokio::test]
    async fn list_for_user_pages_newest_first() {
        let store = InMemoryTransactionStore::new();
        let user = Uuid::new_v4();
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(store.create(new_payment(user)).await.unwrap().id);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        store.create(new_payment(Uuid::new_v4())).await.unwrap();

        let page = store.list_for_user(user, 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, ids[2]);
        assert_eq!(page[1].id, ids[1]);

        let rest = store.list_for_user(user, 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, ids[0]);
    }

    #[tokio::test]
    async fn find_stale_uses_updated_at() {
        let store = InMemoryTransactionStore::new();
        let tx = store.create(new_payment(Uuid::new_v4())).await.unwrap();
        let cutoff = Utc::now() - chrono::Duration::seconds(600);

        assert!(store
            .find_stale(TransactionStatus::Pending, cutoff, 10)
            .await
            .unwrap()
            .is_empty());

        store
            .backdate(tx.id, Utc::now() - chrono::Duration::seconds(900))
            .await;
        let stale = store
            .find_stale(TransactionStatus::Pending, cutoff, 10)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
    }

    #[tokio::test]
    async fn user_store_rejects_duplicate_email() {
        let store = InMemoryUserStore::new();
        let new_user = NewUser {
            email: "Wanjiku@example.com".to_string(),
            phone_number: "+254712345678".to_string(),
            first_name: Some("Wanjiku".to_string()),
            last_name: None,
            account_type: AccountType::Personal,
        };
        let user = store.create(new_user.clone()).await.unwrap();
        assert_eq!(user.email, "wanjiku@example.com");
        assert!(store.create(new_user).await.is_err());
    }
}
