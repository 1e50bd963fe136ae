use crate::database::error::DatabaseError;
use crate::domain::{AccountType, KycStatus, KycSubmission, NewUser, ProfileUpdate, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Persistence seam for user profiles
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, new: NewUser) -> Result<User, DatabaseError>;

    async fn get(&self, id: Uuid) -> Result<Option<User>, DatabaseError>;

    /// Ordered by creation time
    async fn list(&self, skip: i64, limit: i64) -> Result<Vec<User>, DatabaseError>;

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, DatabaseError>;

    /// Store the documents and move the KYC status to `submitted`
    async fn submit_kyc(
        &self,
        id: Uuid,
        submission: &KycSubmission,
    ) -> Result<Option<User>, DatabaseError>;

    async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<User>, DatabaseError>;
}

const USER_COLUMNS: &str = "id, email, phone_number, first_name, last_name, account_type, \
     kyc_status, kyc_document_type, kyc_document_number, is_active, country, \
     preferred_currency, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    phone_number: String,
    first_name: Option<String>,
    last_name: Option<String>,
    account_type: String,
    kyc_status: String,
    kyc_document_type: Option<String>,
    kyc_document_number: Option<String>,
    is_active: bool,
    country: String,
    preferred_currency: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = DatabaseError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            email: row.email,
            phone_number: row.phone_number,
            first_name: row.first_name,
            last_name: row.last_name,
            account_type: row
                .account_type
                .parse::<AccountType>()
                .map_err(DatabaseError::corrupt)?,
            kyc_status: row
                .kyc_status
                .parse::<KycStatus>()
                .map_err(DatabaseError::corrupt)?,
            kyc_document_type: row.kyc_document_type,
            kyc_document_number: row.kyc_document_number,
            is_active: row.is_active,
            country: row.country,
            preferred_currency: row.preferred_currency,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres-backed user repository
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(User::try_from).transpose()
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn create(&self, new: NewUser) -> Result<User, DatabaseError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (id, email, phone_number, first_name, last_name, account_type)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(new.email.to_lowercase())
        .bind(new.phone_number)
        .bind(new.first_name)
        .bind(new.last_name)
        .bind(new.account_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        User::try_from(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        self.fetch(id).await
    }

    async fn list(&self, skip: i64, limit: i64) -> Result<Vec<User>, DatabaseError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users ORDER BY created_at ASC LIMIT $1 OFFSET $2",
            USER_COLUMNS
        ))
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(User::try_from).collect()
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, DatabaseError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users
             SET first_name = COALESCE($2, first_name),
                 last_name = COALESCE($3, last_name),
                 phone_number = COALESCE($4, phone_number),
                 preferred_currency = COALESCE($5, preferred_currency),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(id)
        .bind(update.first_name.as_deref())
        .bind(update.last_name.as_deref())
        .bind(update.phone_number.as_deref())
        .bind(update.preferred_currency.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(User::try_from).transpose()
    }

    async fn submit_kyc(
        &self,
        id: Uuid,
        submission: &KycSubmission,
    ) -> Result<Option<User>, DatabaseError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users
             SET kyc_document_type = $2,
                 kyc_document_number = $3,
                 kyc_status = 'submitted',
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(id)
        .bind(&submission.document_type)
        .bind(&submission.document_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(User::try_from).transpose()
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<User>, DatabaseError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET is_active = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(User::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_with_unknown_account_type_is_corrupt() {
        let now = Utc::now();
        let row = UserRow {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            phone_number: "+254712345678".to_string(),
            first_name: None,
            last_name: None,
            account_type: "superuser".to_string(),
            kyc_status: "pending".to_string(),
            kyc_document_type: None,
            kyc_document_number: None,
            is_active: true,
            country: "Kenya".to_string(),
            preferred_currency: "KES".to_string(),
            created_at: now,
            updated_at: now,
        };
        assert!(User::try_from(row).is_err());
    }
}
