use sqlx::{postgres::PgPoolOptions, PgPool};

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        Ok(db)
    }

    /// Idempotent schema bootstrap.
    ///
    /// The UNIQUE constraints on `accounts.external_uid` and
    /// `provider_listings.account_id` are load-bearing: they are the
    /// store-level serialization boundary for account upserts and for
    /// provider-creation dedup under concurrent registrations.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id UUID PRIMARY KEY,
                external_uid TEXT NOT NULL UNIQUE,
                phone_number TEXT,
                customer_role BOOLEAN NOT NULL DEFAULT FALSE,
                provider_role BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS provider_listings (
                id UUID PRIMARY KEY,
                account_id UUID NOT NULL UNIQUE REFERENCES accounts(id),
                name TEXT NOT NULL,
                service_key TEXT NOT NULL,
                location_parent TEXT NOT NULL,
                location_sub TEXT,
                contact TEXT NOT NULL,
                available BOOLEAN NOT NULL DEFAULT TRUE,
                rating_sum DOUBLE PRECISION NOT NULL DEFAULT 0,
                rating_count BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reviews (
                id UUID PRIMARY KEY,
                provider_id UUID NOT NULL REFERENCES provider_listings(id),
                reviewer_account_id UUID NOT NULL REFERENCES accounts(id),
                rating DOUBLE PRECISION NOT NULL,
                comment TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS reviews_provider_created_idx \
             ON reviews (provider_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS provider_listings_service_idx \
             ON provider_listings (service_key, location_parent)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
