use crate::errors::AppError;
use crate::models::Account;
use sqlx::PgPool;
use uuid::Uuid;

/// Account registry: resolves external identities to internal accounts and
/// merges roles idempotently.
///
/// Role flags only ever transition false -> true. The upsert keyed on
/// `external_uid` is a single statement, so concurrent first interactions for
/// the same identity settle on one record.
pub struct AccountRegistry {
    pool: PgPool,
}

impl AccountRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upserts the account for `external_uid` and claims the customer role.
    ///
    /// Preserves an existing provider role. The phone number is written only
    /// when supplied; otherwise the stored value is kept. Idempotent.
    pub async fn ensure_customer_role(
        &self,
        external_uid: &str,
        phone_number: Option<&str>,
    ) -> Result<Account, AppError> {
        let uid = external_uid.trim();
        if uid.is_empty() {
            return Err(AppError::BadRequest(
                "externalUid must not be empty".to_string(),
            ));
        }

        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (id, external_uid, phone_number, customer_role, provider_role)
            VALUES ($1, $2, $3, TRUE, FALSE)
            ON CONFLICT (external_uid) DO UPDATE
            SET customer_role = TRUE,
                phone_number = COALESCE(EXCLUDED.phone_number, accounts.phone_number)
            RETURNING id, external_uid, phone_number, customer_role, provider_role, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(uid)
        .bind(phone_number)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            "Customer role ensured for uid {} (account {})",
            uid,
            account.id
        );

        Ok(account)
    }

    /// Looks up an account by external uid. Absence is not an error.
    pub async fn find_by_external_uid(
        &self,
        external_uid: &str,
    ) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, external_uid, phone_number, customer_role, provider_role, created_at \
             FROM accounts WHERE external_uid = $1",
        )
        .bind(external_uid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    /// Marks an account as a provider. Monotonic, idempotent.
    pub async fn grant_provider_role(&self, account_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE accounts SET provider_role = TRUE WHERE id = $1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
