use crate::accounts::AccountRegistry;
use crate::errors::{AppError, ResultExt};
use crate::models::{
    ProviderFilter, ProviderListing, ProviderLookup, ProviderSummary, RegisterProviderRequest,
    ServiceKey,
};
use sqlx::PgPool;
use uuid::Uuid;

/// Listing projection with the rating derived from the exact running sum and
/// count. The rounded mean is computed here, on read, never stored.
const LISTING_COLUMNS: &str = "id, account_id, name, service_key, location_parent, location_sub, \
     contact, available, \
     CASE WHEN rating_count = 0 THEN 0::float8 \
          ELSE round((rating_sum / rating_count)::numeric, 1)::float8 END AS rating, \
     rating_count, created_at";

/// `LISTING_COLUMNS` qualified for queries joining `accounts`.
const LISTING_COLUMNS_JOINED: &str = "p.id, p.account_id, p.name, p.service_key, \
     p.location_parent, p.location_sub, p.contact, p.available, \
     CASE WHEN p.rating_count = 0 THEN 0::float8 \
          ELSE round((p.rating_sum / p.rating_count)::numeric, 1)::float8 END AS rating, \
     p.rating_count, p.created_at";

/// Public search projection: no contact, no account linkage.
const SUMMARY_COLUMNS: &str = "id, name, service_key, location_parent, location_sub, \
     CASE WHEN rating_count = 0 THEN 0::float8 \
          ELSE round((rating_sum / rating_count)::numeric, 1)::float8 END AS rating, \
     rating_count, created_at";

/// Outcome of a provider registration attempt.
#[derive(Debug)]
pub enum RegisterOutcome {
    /// A fresh listing was created.
    Created(ProviderListing),
    /// A listing already existed for this account; nothing was overwritten.
    AlreadyRegistered { provider_id: Uuid },
}

/// Provider registry: creates and serves provider listings, one per account.
pub struct ProviderRegistry {
    pool: PgPool,
    accounts: AccountRegistry,
}

impl ProviderRegistry {
    pub fn new(pool: PgPool) -> Self {
        let accounts = AccountRegistry::new(pool.clone());
        Self { pool, accounts }
    }

    /// Registers the caller as a provider.
    ///
    /// Resolves or creates the account (registering as a provider implicitly
    /// also makes the account a customer), then conditionally inserts the
    /// listing. The `UNIQUE (account_id)` constraint plus
    /// `ON CONFLICT DO NOTHING` make the check-then-create race-safe: two
    /// concurrent registrations for one account yield exactly one listing.
    /// A duplicate attempt is an idempotent no-op returning the existing id.
    ///
    /// Caller-identity matching against the request body happens at the
    /// handler, before this is reached.
    pub async fn register_provider(
        &self,
        req: &RegisterProviderRequest,
    ) -> Result<RegisterOutcome, AppError> {
        if req.name.trim().is_empty() {
            return Err(AppError::BadRequest("name must not be empty".to_string()));
        }
        if req.location_parent.trim().is_empty() {
            return Err(AppError::BadRequest(
                "locationParent must not be empty".to_string(),
            ));
        }
        if req.contact.trim().is_empty() {
            return Err(AppError::BadRequest(
                "contact must not be empty".to_string(),
            ));
        }
        let service_key = ServiceKey::parse(&req.service_key).ok_or_else(|| {
            AppError::BadRequest(format!("Unknown serviceKey '{}'", req.service_key))
        })?;

        let account = self
            .accounts
            .ensure_customer_role(&req.user.uid, req.user.phone_number.as_deref())
            .await?;

        let inserted = sqlx::query_as::<_, ProviderListing>(&format!(
            r#"
            INSERT INTO provider_listings
                (id, account_id, name, service_key, location_parent, location_sub, contact)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (account_id) DO NOTHING
            RETURNING {}
            "#,
            LISTING_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(account.id)
        .bind(req.name.trim())
        .bind(service_key.as_str())
        .bind(req.location_parent.trim())
        .bind(req.location_sub.as_deref())
        .bind(req.contact.trim())
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(listing) => {
                self.accounts.grant_provider_role(account.id).await?;
                tracing::info!(
                    "Provider listing {} created for uid {}",
                    listing.id,
                    req.user.uid
                );
                Ok(RegisterOutcome::Created(listing))
            }
            None => {
                // Lost the insert race or re-submitted: surface the existing
                // listing instead of erroring.
                let existing = sqlx::query_as::<_, (Uuid,)>(
                    "SELECT id FROM provider_listings WHERE account_id = $1",
                )
                .bind(account.id)
                .fetch_optional(&self.pool)
                .await
                .context("Resolving existing listing after registration conflict")?
                .ok_or_else(|| {
                    AppError::InternalError(
                        "Listing insert conflicted but no existing listing found".to_string(),
                    )
                })?;

                // Re-issue the grant: an earlier attempt interrupted between
                // the listing insert and the role update leaves a listing
                // whose account lacks the provider role.
                self.accounts.grant_provider_role(account.id).await?;

                tracing::debug!(
                    "Provider registration for uid {} already satisfied by listing {}",
                    req.user.uid,
                    existing.0
                );
                Ok(RegisterOutcome::AlreadyRegistered {
                    provider_id: existing.0,
                })
            }
        }
    }

    /// Lists available providers matching the filter, best-rated first.
    pub async fn list_providers(
        &self,
        filter: &ProviderFilter,
    ) -> Result<Vec<ProviderSummary>, AppError> {
        if let Some(ref key) = filter.service_key {
            if ServiceKey::parse(key).is_none() {
                return Err(AppError::BadRequest(format!("Unknown serviceKey '{}'", key)));
            }
        }

        let providers = sqlx::query_as::<_, ProviderSummary>(&format!(
            r#"
            SELECT {}
            FROM provider_listings
            WHERE available = TRUE
              AND ($1::text IS NULL OR service_key = $1)
              AND ($2::text IS NULL OR location_parent = $2)
            ORDER BY CASE WHEN rating_count = 0 THEN 0
                          ELSE rating_sum / rating_count END DESC,
                     created_at ASC
            "#,
            SUMMARY_COLUMNS
        ))
        .bind(filter.service_key.as_deref())
        .bind(filter.location_parent.as_deref())
        .fetch_all(&self.pool)
        .await?;

        Ok(providers)
    }

    /// Fetches one available listing by id.
    pub async fn get_provider_by_id(&self, id: Uuid) -> Result<ProviderListing, AppError> {
        sqlx::query_as::<_, ProviderListing>(&format!(
            "SELECT {} FROM provider_listings WHERE id = $1 AND available = TRUE",
            LISTING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Provider {} not found", id)))
    }

    /// Existence check for the caller's own listing.
    ///
    /// Never errors on absence, and includes an unavailable listing: owners
    /// see their own listing regardless of availability.
    pub async fn get_provider_by_account(
        &self,
        external_uid: &str,
    ) -> Result<ProviderLookup, AppError> {
        let provider = sqlx::query_as::<_, ProviderListing>(&format!(
            r#"
            SELECT {}
            FROM provider_listings p
            JOIN accounts a ON a.id = p.account_id
            WHERE a.external_uid = $1
            "#,
            LISTING_COLUMNS_JOINED
        ))
        .bind(external_uid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ProviderLookup {
            exists: provider.is_some(),
            provider,
        })
    }

    /// Toggles a listing's availability, owner only.
    ///
    /// Loads the listing with its owning account first; a non-owning caller
    /// gets `Forbidden` and the listing is not touched.
    pub async fn set_availability(
        &self,
        id: Uuid,
        available: bool,
        caller_uid: &str,
    ) -> Result<ProviderListing, AppError> {
        let owner_uid = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT a.external_uid
            FROM provider_listings p
            JOIN accounts a ON a.id = p.account_id
            WHERE p.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Provider {} not found", id)))?
        .0;

        if owner_uid != caller_uid {
            return Err(AppError::Forbidden(
                "Only the owning account may change availability".to_string(),
            ));
        }

        let listing = sqlx::query_as::<_, ProviderListing>(&format!(
            "UPDATE provider_listings SET available = $2 WHERE id = $1 RETURNING {}",
            LISTING_COLUMNS
        ))
        .bind(id)
        .bind(available)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Provider {} availability set to {}", id, available);
        Ok(listing)
    }
}
