/// Integration tests for the registries and the review aggregator against a
/// real Postgres instance.
/// Marked ignored to avoid running against production by accident; set
/// TEST_DATABASE_URL to run (`cargo test -- --ignored`).
use std::env;
use std::sync::Arc;
use uuid::Uuid;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use provider_directory_api::accounts::AccountRegistry;
use provider_directory_api::auth::SessionKeys;
use provider_directory_api::db::Database;
use provider_directory_api::errors::AppError;
use provider_directory_api::handlers::{self, AppState};
use provider_directory_api::models::{
    ProviderFilter, RegisterProviderRequest, RegisterUser,
};
use provider_directory_api::providers::{ProviderRegistry, RegisterOutcome};
use provider_directory_api::reviews::ReviewAggregator;
use sqlx::PgPool;
use tower::ServiceExt;

async fn test_pool() -> anyhow::Result<PgPool> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    Ok(db.pool)
}

/// Fresh uid per run so repeated runs never collide.
fn unique_uid(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

fn registration(uid: &str, service_key: &str, location: &str) -> RegisterProviderRequest {
    RegisterProviderRequest {
        user: RegisterUser {
            uid: uid.to_string(),
            phone_number: Some("+8801700000000".to_string()),
        },
        name: "Test Provider".to_string(),
        service_key: service_key.to_string(),
        location_parent: location.to_string(),
        location_sub: None,
        contact: "provider@example.com".to_string(),
    }
}

#[tokio::test]
#[ignore]
async fn ensure_customer_role_is_idempotent() -> anyhow::Result<()> {
    let pool = test_pool().await?;
    let registry = AccountRegistry::new(pool.clone());
    let uid = unique_uid("cust");

    let first = registry
        .ensure_customer_role(&uid, Some("+8801711111111"))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let second = registry
        .ensure_customer_role(&uid, None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    assert_eq!(first.id, second.id);
    assert!(second.customer_role);
    // Absent phone on the second call must not erase the stored one
    assert_eq!(second.phone_number.as_deref(), Some("+8801711111111"));

    let count: (i64,) = sqlx::query_as("SELECT count(*) FROM accounts WHERE external_uid = $1")
        .bind(&uid)
        .fetch_one(&pool)
        .await?;
    assert_eq!(count.0, 1);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn empty_uid_is_a_validation_error() -> anyhow::Result<()> {
    let pool = test_pool().await?;
    let registry = AccountRegistry::new(pool);

    let result = registry.ensure_customer_role("   ", None).await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));
    Ok(())
}

#[tokio::test]
#[ignore]
async fn provider_registration_merges_roles_and_is_idempotent() -> anyhow::Result<()> {
    let pool = test_pool().await?;
    let registry = ProviderRegistry::new(pool.clone());
    let accounts = AccountRegistry::new(pool.clone());
    let uid = unique_uid("prov");

    let outcome = registry
        .register_provider(&registration(&uid, "plumber", "Dhaka"))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let listing = match outcome {
        RegisterOutcome::Created(listing) => listing,
        RegisterOutcome::AlreadyRegistered { .. } => panic!("first registration must create"),
    };
    assert!(listing.available);
    assert_eq!(listing.rating, 0.0);
    assert_eq!(listing.rating_count, 0);

    // Registering as a provider also claims the customer role
    let account = accounts
        .find_by_external_uid(&uid)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .expect("account created by registration");
    assert!(account.customer_role);
    assert!(account.provider_role);

    // Second attempt is an idempotent no-op pointing at the same listing
    let outcome = registry
        .register_provider(&registration(&uid, "plumber", "Dhaka"))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    match outcome {
        RegisterOutcome::AlreadyRegistered { provider_id } => {
            assert_eq!(provider_id, listing.id)
        }
        RegisterOutcome::Created(_) => panic!("duplicate registration must not create"),
    }
    Ok(())
}

#[tokio::test]
#[ignore]
async fn duplicate_registration_repairs_missing_provider_role() -> anyhow::Result<()> {
    let pool = test_pool().await?;
    let registry = ProviderRegistry::new(pool.clone());
    let accounts = AccountRegistry::new(pool.clone());
    let uid = unique_uid("repair");

    let listing = match registry
        .register_provider(&registration(&uid, "plumber", "Barishal"))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
    {
        RegisterOutcome::Created(l) => l,
        _ => panic!("expected fresh listing"),
    };

    // Simulate an earlier attempt interrupted between the listing insert and
    // the role grant: the listing exists but the account lost the role
    sqlx::query("UPDATE accounts SET provider_role = FALSE WHERE external_uid = $1")
        .bind(&uid)
        .execute(&pool)
        .await?;

    // Re-issued registration takes the duplicate branch and must re-grant
    match registry
        .register_provider(&registration(&uid, "plumber", "Barishal"))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
    {
        RegisterOutcome::AlreadyRegistered { provider_id } => {
            assert_eq!(provider_id, listing.id)
        }
        RegisterOutcome::Created(_) => panic!("duplicate registration must not create"),
    }

    let account = accounts
        .find_by_external_uid(&uid)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .expect("account exists");
    assert!(account.provider_role);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn customer_role_endpoint_ignores_phone_from_token_claims() -> anyhow::Result<()> {
    let pool = test_pool().await?;
    let uid = unique_uid("phone");

    let keys = SessionKeys::new("integration_secret_16", "provider-directory-test".to_string());
    let state = Arc::new(AppState {
        db: pool.clone(),
        sessions: keys.clone(),
    });
    let app = handlers::api_router(state);

    // Token carries a phone claim; the empty body supplies none
    let token = keys.issue(&uid, Some("+8801722222222".to_string()))?;
    let response = app
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(format!("/users/{}/customer-role", uid))
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())?,
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let account = AccountRegistry::new(pool)
        .find_by_external_uid(&uid)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .expect("account created");
    assert!(account.customer_role);
    // Phone is written only when the body supplies it
    assert!(account.phone_number.is_none());
    Ok(())
}

#[tokio::test]
#[ignore]
async fn concurrent_registrations_yield_exactly_one_listing() -> anyhow::Result<()> {
    let pool = test_pool().await?;
    let uid = unique_uid("race");

    let mut handles = vec![];
    for _ in 0..8 {
        let pool = pool.clone();
        let uid = uid.clone();
        handles.push(tokio::spawn(async move {
            let registry = ProviderRegistry::new(pool);
            registry
                .register_provider(&registration(&uid, "electrician", "Dhaka"))
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await? {
            Ok(RegisterOutcome::Created(_)) => created += 1,
            Ok(RegisterOutcome::AlreadyRegistered { .. }) => {}
            Err(e) => panic!("registration failed: {}", e),
        }
    }
    assert_eq!(created, 1);

    let count: (i64,) = sqlx::query_as(
        "SELECT count(*) FROM provider_listings p \
         JOIN accounts a ON a.id = p.account_id WHERE a.external_uid = $1",
    )
    .bind(&uid)
    .fetch_one(&pool)
    .await?;
    assert_eq!(count.0, 1);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn review_of_4_then_5_averages_to_4_5() -> anyhow::Result<()> {
    let pool = test_pool().await?;
    let registry = ProviderRegistry::new(pool.clone());
    let accounts = AccountRegistry::new(pool.clone());
    let aggregator = ReviewAggregator::new(pool.clone());

    let uid = unique_uid("rated");
    let listing = match registry
        .register_provider(&registration(&uid, "tutor", "Dhaka"))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
    {
        RegisterOutcome::Created(listing) => listing,
        _ => panic!("expected fresh listing"),
    };

    let reviewer = accounts
        .ensure_customer_role(&unique_uid("reviewer"), None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    for rating in [4.0, 5.0] {
        aggregator
            .submit_review(listing.id, reviewer.id, rating, Some("solid work"))
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    }

    let refreshed = registry
        .get_provider_by_id(listing.id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(refreshed.rating_count, 2);
    assert_eq!(refreshed.rating, 4.5);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn concurrent_reviews_lose_no_updates() -> anyhow::Result<()> {
    let pool = test_pool().await?;
    let registry = ProviderRegistry::new(pool.clone());
    let accounts = AccountRegistry::new(pool.clone());

    let uid = unique_uid("swarm");
    let listing = match registry
        .register_provider(&registration(&uid, "electrician", "Chattogram"))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
    {
        RegisterOutcome::Created(listing) => listing,
        _ => panic!("expected fresh listing"),
    };

    let reviewer = accounts
        .ensure_customer_role(&unique_uid("reviewer"), None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let ratings: Vec<f64> = (0..10).map(|i| 1.0 + (i % 5) as f64).collect();
    let expected_mean = ratings.iter().sum::<f64>() / ratings.len() as f64;

    let mut handles = vec![];
    for rating in ratings.clone() {
        let pool = pool.clone();
        let provider_id = listing.id;
        let reviewer_id = reviewer.id;
        handles.push(tokio::spawn(async move {
            ReviewAggregator::new(pool)
                .submit_review(provider_id, reviewer_id, rating, None)
                .await
        }));
    }
    for handle in handles {
        handle.await?.map_err(|e| anyhow::anyhow!(e.to_string()))?;
    }

    let refreshed = registry
        .get_provider_by_id(listing.id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(refreshed.rating_count, ratings.len() as i64);
    let rounded_mean = (expected_mean * 10.0).round() / 10.0;
    assert!((refreshed.rating - rounded_mean).abs() < 1e-9);

    let stored: (i64,) = sqlx::query_as("SELECT count(*) FROM reviews WHERE provider_id = $1")
        .bind(listing.id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(stored.0, ratings.len() as i64);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn review_for_missing_listing_is_not_found() -> anyhow::Result<()> {
    let pool = test_pool().await?;
    let accounts = AccountRegistry::new(pool.clone());
    let aggregator = ReviewAggregator::new(pool.clone());

    let reviewer = accounts
        .ensure_customer_role(&unique_uid("reviewer"), None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let result = aggregator
        .submit_review(Uuid::new_v4(), reviewer.id, 5.0, None)
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    Ok(())
}

#[tokio::test]
#[ignore]
async fn listing_search_excludes_unavailable_and_sorts_by_rating() -> anyhow::Result<()> {
    let pool = test_pool().await?;
    let registry = ProviderRegistry::new(pool.clone());
    let accounts = AccountRegistry::new(pool.clone());
    let aggregator = ReviewAggregator::new(pool.clone());

    // Isolate this test's listings with a unique location
    let location = format!("Loc-{}", Uuid::new_v4());

    let uid_low = unique_uid("low");
    let uid_high = unique_uid("high");
    let uid_hidden = unique_uid("hidden");

    let low = match registry
        .register_provider(&registration(&uid_low, "plumber", &location))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
    {
        RegisterOutcome::Created(l) => l,
        _ => panic!("expected fresh listing"),
    };
    let high = match registry
        .register_provider(&registration(&uid_high, "plumber", &location))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
    {
        RegisterOutcome::Created(l) => l,
        _ => panic!("expected fresh listing"),
    };
    let hidden = match registry
        .register_provider(&registration(&uid_hidden, "plumber", &location))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
    {
        RegisterOutcome::Created(l) => l,
        _ => panic!("expected fresh listing"),
    };

    let reviewer = accounts
        .ensure_customer_role(&unique_uid("reviewer"), None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    aggregator
        .submit_review(low.id, reviewer.id, 2.0, None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    aggregator
        .submit_review(high.id, reviewer.id, 5.0, None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    registry
        .set_availability(hidden.id, false, &uid_hidden)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let filter = ProviderFilter {
        service_key: Some("plumber".to_string()),
        location_parent: Some(location.clone()),
    };
    let results = registry
        .list_providers(&filter)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let ids: Vec<Uuid> = results.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![high.id, low.id]);
    assert!(!ids.contains(&hidden.id));
    Ok(())
}

#[tokio::test]
#[ignore]
async fn unavailable_listing_is_hidden_from_public_fetch_but_not_owner_lookup() -> anyhow::Result<()>
{
    let pool = test_pool().await?;
    let registry = ProviderRegistry::new(pool.clone());
    let uid = unique_uid("toggler");

    let listing = match registry
        .register_provider(&registration(&uid, "others", "Sylhet"))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
    {
        RegisterOutcome::Created(l) => l,
        _ => panic!("expected fresh listing"),
    };

    registry
        .set_availability(listing.id, false, &uid)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let public = registry.get_provider_by_id(listing.id).await;
    assert!(matches!(public, Err(AppError::NotFound(_))));

    let lookup = registry
        .get_provider_by_account(&uid)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(lookup.exists);
    assert_eq!(lookup.provider.unwrap().id, listing.id);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn non_owner_cannot_toggle_availability() -> anyhow::Result<()> {
    let pool = test_pool().await?;
    let registry = ProviderRegistry::new(pool.clone());
    let uid = unique_uid("owner");

    let listing = match registry
        .register_provider(&registration(&uid, "tutor", "Rajshahi"))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
    {
        RegisterOutcome::Created(l) => l,
        _ => panic!("expected fresh listing"),
    };

    let result = registry
        .set_availability(listing.id, false, "someone-else")
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    // Listing untouched by the rejected mutation
    let refreshed = registry
        .get_provider_by_id(listing.id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(refreshed.available);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn review_listing_honors_limit_and_recency() -> anyhow::Result<()> {
    let pool = test_pool().await?;
    let registry = ProviderRegistry::new(pool.clone());
    let accounts = AccountRegistry::new(pool.clone());
    let aggregator = ReviewAggregator::new(pool.clone());

    let uid = unique_uid("reviewed");
    let listing = match registry
        .register_provider(&registration(&uid, "electrician", "Khulna"))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
    {
        RegisterOutcome::Created(l) => l,
        _ => panic!("expected fresh listing"),
    };

    let reviewer = accounts
        .ensure_customer_role(&unique_uid("reviewer"), None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    for i in 0..5 {
        aggregator
            .submit_review(listing.id, reviewer.id, 3.0, Some(&format!("review {}", i)))
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    }

    // Default limit is 3
    let recent = aggregator
        .list_reviews(listing.id, None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(recent.len(), 3);
    assert!(recent.windows(2).all(|w| w[0].created_at >= w[1].created_at));

    let all = aggregator
        .list_reviews(listing.id, Some(10))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(all.len(), 5);
    Ok(())
}
