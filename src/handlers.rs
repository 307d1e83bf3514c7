use crate::accounts::AccountRegistry;
use crate::auth::{self, AuthContext};
use crate::errors::AppError;
use crate::models::{
    AvailabilityRequest, EnsureCustomerRoleRequest, ProviderFilter, RegisterProviderRequest,
    ReviewQuery, SubmitReviewRequest,
};
use crate::providers::{ProviderRegistry, RegisterOutcome};
use crate::reviews::ReviewAggregator;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Session token verifier (the access-guard boundary).
    pub sessions: auth::SessionKeys,
}

/// Builds the API router with the identity middleware attached.
///
/// The caller adds outer layers (rate limiting, body limit, tracing, CORS);
/// keeping them outside makes the router directly testable.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/users/:uid/customer-role", patch(ensure_customer_role))
        .route("/providers", get(list_providers).post(register_provider))
        .route("/providers/by-uid/:uid", get(get_provider_by_uid))
        .route("/providers/:id", get(get_provider))
        .route("/providers/:id/availability", patch(set_availability))
        .route("/reviews", post(submit_review))
        .route("/reviews/provider/:id", get(list_reviews))
        .route("/logout", post(logout))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::attach_identity,
        ))
        .with_state(state)
}

/// Health check endpoint.
///
/// Returns the service status and version.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "provider-directory-api",
            "version": "0.1.0"
        })),
    )
}

/// PATCH /users/:uid/customer-role
///
/// Ensures the caller's account exists and carries the customer role.
/// Idempotent; preserves an existing provider role.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `uid` - External uid from the path; must match the caller.
/// * `auth` - Verified caller identity.
/// * `body` - Optional phone number to attach.
///
/// # Returns
///
/// * `Result<Json<serde_json::Value>, AppError>` - The merged account or an error.
pub async fn ensure_customer_role(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
    Extension(auth): Extension<AuthContext>,
    body: Option<Json<EnsureCustomerRoleRequest>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let caller = auth.require()?;
    if caller.external_uid != uid {
        return Err(AppError::Forbidden(
            "Cannot modify another account".to_string(),
        ));
    }

    // Phone is written only when the body supplies it; the token claim is
    // identity material, not profile input.
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let registry = AccountRegistry::new(state.db.clone());
    let account = registry
        .ensure_customer_role(&uid, body.phone_number.as_deref())
        .await?;

    Ok(Json(json!({
        "success": true,
        "account": account,
    })))
}

/// POST /providers
///
/// Registers the caller as a provider. Duplicate registration for the same
/// account is an idempotent no-op returning the existing listing id.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `auth` - Verified caller identity; must match `body.user.uid`.
/// * `req` - Provider profile to register.
///
/// # Returns
///
/// * `Result<impl IntoResponse, AppError>` - 201 with the fresh listing, or
///   200 with the existing id and a message.
pub async fn register_provider(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<RegisterProviderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let caller = auth.require()?;
    if caller.external_uid != req.user.uid {
        return Err(AppError::Forbidden(
            "Cannot register a provider for another account".to_string(),
        ));
    }

    let registry = ProviderRegistry::new(state.db.clone());
    match registry.register_provider(&req).await? {
        RegisterOutcome::Created(listing) => Ok((
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "providerId": listing.id,
                "provider": listing,
                "message": "Provider registered",
            })),
        )),
        RegisterOutcome::AlreadyRegistered { provider_id } => Ok((
            StatusCode::OK,
            Json(json!({
                "success": true,
                "providerId": provider_id,
                "message": "Provider already registered for this account",
            })),
        )),
    }
}

/// GET /providers
///
/// Lists available providers, best-rated first, filterable by service key
/// and parent location. Public; contact details are excluded.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `filter` - Optional `serviceKey` / `locationParent` query parameters.
///
/// # Returns
///
/// * `Result<Json<serde_json::Value>, AppError>` - The matching listings.
pub async fn list_providers(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ProviderFilter>,
) -> Result<Json<serde_json::Value>, AppError> {
    let registry = ProviderRegistry::new(state.db.clone());
    let providers = registry.list_providers(&filter).await?;

    Ok(Json(json!({
        "success": true,
        "providers": providers,
    })))
}

/// GET /providers/by-uid/:uid
///
/// Existence check for the caller's own listing. Never errors on absence.
pub async fn get_provider_by_uid(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<serde_json::Value>, AppError> {
    let caller = auth.require()?;
    if caller.external_uid != uid {
        return Err(AppError::Forbidden(
            "Cannot inspect another account's listing".to_string(),
        ));
    }

    let registry = ProviderRegistry::new(state.db.clone());
    let lookup = registry.get_provider_by_account(&uid).await?;

    Ok(Json(json!({
        "success": true,
        "exists": lookup.exists,
        "provider": lookup.provider,
    })))
}

/// GET /providers/:id
///
/// Fetches one available listing. Public.
///
/// # Returns
///
/// * 400 for a syntactically invalid id, 404 for a well-formed but absent or
///   unavailable one.
pub async fn get_provider(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_provider_id(&id)?;

    let registry = ProviderRegistry::new(state.db.clone());
    let provider = registry.get_provider_by_id(id).await?;

    Ok(Json(json!({
        "success": true,
        "provider": provider,
    })))
}

/// PATCH /providers/:id/availability
///
/// Toggles a listing's availability. Only the owning account may do this;
/// a non-owner gets 403 and the listing is untouched.
pub async fn set_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<AvailabilityRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let caller = auth.require()?;
    let id = parse_provider_id(&id)?;

    let registry = ProviderRegistry::new(state.db.clone());
    let provider = registry
        .set_availability(id, req.available, &caller.external_uid)
        .await?;

    Ok(Json(json!({
        "success": true,
        "provider": provider,
    })))
}

/// POST /reviews
///
/// Appends a review from the authenticated caller and advances the listing's
/// rating aggregate atomically. The reviewer account is resolved (created on
/// first interaction) from the caller identity, never from the body.
pub async fn submit_review(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<SubmitReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    let caller = auth.require()?;
    let provider_id = parse_provider_id(&req.provider_id)?;

    let accounts = AccountRegistry::new(state.db.clone());
    let reviewer = accounts
        .ensure_customer_role(&caller.external_uid, caller.phone_number.as_deref())
        .await?;

    let aggregator = ReviewAggregator::new(state.db.clone());
    let review = aggregator
        .submit_review(provider_id, reviewer.id, req.rating, req.comment.as_deref())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "review": review,
        })),
    ))
}

/// GET /reviews/provider/:id
///
/// Most recent reviews for a listing, newest first, default limit 3. Public.
pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ReviewQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let provider_id = parse_provider_id(&id)?;

    let aggregator = ReviewAggregator::new(state.db.clone());
    let reviews = aggregator.list_reviews(provider_id, query.limit).await?;

    Ok(Json(json!({
        "success": true,
        "reviews": reviews,
    })))
}

/// POST /logout
///
/// Clears the session cookie. No auth required; token invalidation beyond
/// cookie expiry is the issuer's concern.
pub async fn logout() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::SET_COOKIE, auth::clear_session_cookie())],
        Json(json!({
            "success": true,
            "message": "Logged out",
        })),
    )
}

/// Parses a provider id, mapping syntactic invalidity to a 400.
fn parse_provider_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::BadRequest(format!("Invalid provider id '{}'", raw)))
}
