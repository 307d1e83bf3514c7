use crate::errors::AppError;
use crate::models::Review;
use sqlx::PgPool;
use uuid::Uuid;

/// Default number of reviews returned by `list_reviews`.
pub const DEFAULT_REVIEW_LIMIT: i64 = 3;
/// Hard cap on the review page size.
pub const MAX_REVIEW_LIMIT: i64 = 50;

/// Review aggregator: appends immutable reviews and maintains each listing's
/// running rating aggregate.
///
/// The aggregate is kept as an exact `rating_sum` plus `rating_count` and
/// both are advanced with a single relative-increment UPDATE, so concurrent
/// submissions for one listing serialize at the store and no update is lost.
/// The mean is derived (and rounded) on read only.
pub struct ReviewAggregator {
    pool: PgPool,
}

impl ReviewAggregator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends a review and advances the listing's rating aggregate.
    ///
    /// Both writes happen in one transaction: the increment runs first and
    /// doubles as the existence check (zero rows updated means the listing is
    /// absent), then the review row is inserted.
    pub async fn submit_review(
        &self,
        provider_id: Uuid,
        reviewer_account_id: Uuid,
        rating: f64,
        comment: Option<&str>,
    ) -> Result<Review, AppError> {
        if !rating.is_finite() || !(1.0..=5.0).contains(&rating) {
            return Err(AppError::BadRequest(
                "rating must be a number between 1 and 5".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE provider_listings \
             SET rating_sum = rating_sum + $2, rating_count = rating_count + 1 \
             WHERE id = $1",
        )
        .bind(provider_id)
        .bind(rating)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!(
                "Provider {} not found",
                provider_id
            )));
        }

        let review = sqlx::query_as::<_, Review>(
            r#"
            INSERT INTO reviews (id, provider_id, reviewer_account_id, rating, comment)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, provider_id, reviewer_account_id, rating, comment, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(provider_id)
        .bind(reviewer_account_id)
        .bind(rating)
        .bind(comment)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Review {} recorded for provider {} (rating {})",
            review.id,
            provider_id,
            rating
        );

        Ok(review)
    }

    /// Most recent reviews for a listing, newest first.
    pub async fn list_reviews(
        &self,
        provider_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<Review>, AppError> {
        let limit = limit
            .unwrap_or(DEFAULT_REVIEW_LIMIT)
            .clamp(1, MAX_REVIEW_LIMIT);

        let reviews = sqlx::query_as::<_, Review>(
            "SELECT id, provider_id, reviewer_account_id, rating, comment, created_at \
             FROM reviews WHERE provider_id = $1 \
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(provider_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(reviews)
    }
}

/// Mean rating rounded to one decimal for display; 0.0 when unreviewed.
///
/// Mirrors the SQL read projection so in-process callers round identically.
pub fn display_rating(rating_sum: f64, rating_count: i64) -> f64 {
    if rating_count == 0 {
        0.0
    } else {
        ((rating_sum / rating_count as f64) * 10.0).round() / 10.0
    }
}
