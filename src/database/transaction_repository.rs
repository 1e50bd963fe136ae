use crate::database::error::DatabaseError;
use crate::domain::{
    Currency, NewTransaction, PaymentMethod, StatusPatch, Transaction, TransactionStatus,
    TransactionType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

/// Persistence seam for transaction records.
///
/// Status changes go through [`TransactionStore::transition`], which only applies
/// when the stored status still equals `from`. A `None` result means another writer
/// moved the row first.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn create(&self, new: NewTransaction) -> Result<Transaction, DatabaseError>;

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError>;

    /// Look up by the rail-assigned reference (M-Pesa CheckoutRequestID or chain hash)
    async fn find_by_reference(&self, reference: &str)
        -> Result<Option<Transaction>, DatabaseError>;

    /// Newest first
    async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, DatabaseError>;

    async fn transition(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
        patch: &StatusPatch,
    ) -> Result<Option<Transaction>, DatabaseError>;

    /// Store the latest confirmation count of a processing transaction
    async fn record_confirmations(
        &self,
        id: Uuid,
        confirmations: i32,
    ) -> Result<Option<Transaction>, DatabaseError>;

    /// Rows in `status` whose last update is older than `updated_before`, oldest first
    async fn find_stale(
        &self,
        status: TransactionStatus,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError>;
}

const TRANSACTION_COLUMNS: &str = "id, user_id, transaction_type, status, payment_method, \
     amount_crypto, amount_kes, currency, to_address, from_address, blockchain_hash, \
     mpesa_checkout_request_id, mpesa_receipt_number, network_fee, confirmations, \
     required_confirmations, description, idempotency_key, error_message, created_at, \
     updated_at, processed_at, confirmed_at";

/// Raw row; enum columns are stored as text
#[derive(Debug, Clone, FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    transaction_type: String,
    status: String,
    payment_method: String,
    amount_crypto: Option<BigDecimal>,
    amount_kes: Option<BigDecimal>,
    currency: String,
    to_address: Option<String>,
    from_address: Option<String>,
    blockchain_hash: Option<String>,
    mpesa_checkout_request_id: Option<String>,
    mpesa_receipt_number: Option<String>,
    network_fee: BigDecimal,
    confirmations: i32,
    required_confirmations: i32,
    description: Option<String>,
    idempotency_key: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = DatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: row.id,
            user_id: row.user_id,
            transaction_type: row
                .transaction_type
                .parse::<TransactionType>()
                .map_err(DatabaseError::corrupt)?,
            status: row
                .status
                .parse::<TransactionStatus>()
                .map_err(DatabaseError::corrupt)?,
            payment_method: row
                .payment_method
                .parse::<PaymentMethod>()
                .map_err(DatabaseError::corrupt)?,
            amount_crypto: row.amount_crypto,
            amount_kes: row.amount_kes,
            currency: row
                .currency
                .parse::<Currency>()
                .map_err(|e| DatabaseError::corrupt(e.to_string()))?,
            to_address: row.to_address,
            from_address: row.from_address,
            blockchain_hash: row.blockchain_hash,
            mpesa_checkout_request_id: row.mpesa_checkout_request_id,
            mpesa_receipt_number: row.mpesa_receipt_number,
            network_fee: row.network_fee,
            confirmations: row.confirmations,
            required_confirmations: row.required_confirmations,
            description: row.description,
            idempotency_key: row.idempotency_key,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            processed_at: row.processed_at,
            confirmed_at: row.confirmed_at,
        })
    }
}

fn into_transactions(rows: Vec<TransactionRow>) -> Result<Vec<Transaction>, DatabaseError> {
    rows.into_iter().map(Transaction::try_from).collect()
}

/// Postgres-backed transaction repository
#[derive(Clone)]
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(Transaction::try_from).transpose()
    }
}

#[async_trait]
impl TransactionStore for TransactionRepository {
    async fn create(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "INSERT INTO transactions
             (id, user_id, transaction_type, status, payment_method, amount_crypto, amount_kes,
              currency, to_address, from_address, network_fee, required_confirmations,
              description, idempotency_key)
             VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(new.transaction_type.as_str())
        .bind(new.payment_method.as_str())
        .bind(new.amount_crypto)
        .bind(new.amount_kes)
        .bind(new.currency.as_str())
        .bind(new.to_address)
        .bind(new.from_address)
        .bind(new.network_fee)
        .bind(new.required_confirmations)
        .bind(new.description)
        .bind(new.idempotency_key)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Transaction::try_from(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
        self.fetch(id).await
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions
             WHERE mpesa_checkout_request_id = $1 OR blockchain_hash = $1
             ORDER BY created_at DESC
             LIMIT 1",
            TRANSACTION_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(Transaction::try_from).transpose()
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions
             WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3",
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_transactions(rows)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
        patch: &StatusPatch,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "UPDATE transactions
             SET status = $3,
                 blockchain_hash = COALESCE($4, blockchain_hash),
                 mpesa_checkout_request_id = COALESCE($5, mpesa_checkout_request_id),
                 mpesa_receipt_number = COALESCE($6, mpesa_receipt_number),
                 confirmations = COALESCE($7, confirmations),
                 error_message = COALESCE($8, error_message),
                 processed_at = CASE WHEN $3::text = 'processing' THEN NOW() ELSE processed_at END,
                 confirmed_at = CASE WHEN $3::text = 'confirmed' THEN NOW() ELSE confirmed_at END,
                 updated_at = NOW()
             WHERE id = $1 AND status = $2
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(patch.blockchain_hash.as_deref())
        .bind(patch.mpesa_checkout_request_id.as_deref())
        .bind(patch.mpesa_receipt_number.as_deref())
        .bind(patch.confirmations)
        .bind(patch.error_message.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(Transaction::try_from).transpose()
    }

    async fn record_confirmations(
        &self,
        id: Uuid,
        confirmations: i32,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "UPDATE transactions
             SET confirmations = $2, updated_at = NOW()
             WHERE id = $1 AND status = 'processing'
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .bind(confirmations)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(Transaction::try_from).transpose()
    }

    async fn find_stale(
        &self,
        status: TransactionStatus,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions
             WHERE status = $1 AND updated_at < $2
             ORDER BY updated_at ASC
             LIMIT $3",
            TRANSACTION_COLUMNS
        ))
        .bind(status.as_str())
        .bind(updated_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_transactions(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::DatabaseErrorKind;

    fn row() -> TransactionRow {
        let now = Utc::now();
        TransactionRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            transaction_type: "payment".to_string(),
            status: "processing".to_string(),
            payment_method: "usdt_ethereum".to_string(),
            amount_crypto: Some(BigDecimal::from(100)),
            amount_kes: None,
            currency: "USDT".to_string(),
            to_address: Some("0x742d35Cc6634C0532925a3b844Bc454e4438f44e".to_string()),
            from_address: None,
            blockchain_hash: Some("0xabc".to_string()),
            mpesa_checkout_request_id: None,
            mpesa_receipt_number: None,
            network_fee: BigDecimal::from(0),
            confirmations: 1,
            required_confirmations: 3,
            description: None,
            idempotency_key: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            processed_at: Some(now),
            confirmed_at: None,
        }
    }

    #[test]
    fn row_maps_onto_domain_transaction() {
        let tx = Transaction::try_from(row()).unwrap();
        assert_eq!(tx.status, TransactionStatus::Processing);
        assert_eq!(tx.payment_method, PaymentMethod::UsdtEthereum);
        assert_eq!(tx.currency, Currency::Usdt);
        assert_eq!(tx.rail_reference(), Some("0xabc"));
    }

    #[test]
    fn unknown_status_is_reported_as_corrupt() {
        let mut bad = row();
        bad.status = "settled".to_string();
        let err = Transaction::try_from(bad).unwrap_err();
        assert!(matches!(err.kind, DatabaseErrorKind::Corrupt { .. }));
    }

    #[tokio::test]
    #[ignore] // Requires database running
    async fn test_transition_is_compare_and_set() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let pool = crate::database::init_pool(&url, None).await.unwrap();
        crate::database::run_migrations(&pool).await.unwrap();
        let repo = TransactionRepository::new(pool);

        let tx = repo
            .create(NewTransaction {
                user_id: Uuid::new_v4(),
                transaction_type: TransactionType::Payment,
                payment_method: PaymentMethod::Mpesa,
                amount_crypto: None,
                amount_kes: Some(BigDecimal::from(100)),
                currency: Currency::Kes,
                to_address: Some("+254712345678".to_string()),
                from_address: None,
                network_fee: BigDecimal::from(0),
                required_confirmations: 1,
                description: None,
                idempotency_key: None,
            })
            .await
            .unwrap();

        let patch = StatusPatch::default();
        let first = repo
            .transition(tx.id, TransactionStatus::Pending, TransactionStatus::Processing, &patch)
            .await
            .unwrap();
        assert!(first.is_some());
        assert!(first.unwrap().processed_at.is_some());

        let second = repo
            .transition(tx.id, TransactionStatus::Pending, TransactionStatus::Failed, &patch)
            .await
            .unwrap();
        assert!(second.is_none());
    }
}
