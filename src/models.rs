use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============ Database Models ============

/// Represents an account resolved from an external identity.
///
/// Accounts are created on first interaction and their roles are merged
/// monotonically: a role flag only ever transitions from false to true.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Unique identifier for the account.
    pub id: Uuid,
    /// External identity this account is keyed on (unique).
    pub external_uid: String,
    /// Optional contact phone number.
    pub phone_number: Option<String>,
    /// Whether the account has claimed the customer role.
    pub customer_role: bool,
    /// Whether the account has registered as a provider.
    pub provider_role: bool,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
}

/// A provider listing, one-to-one with an account.
///
/// `rating` is derived on read from the exact running `rating_sum` and
/// `rating_count`; the rounded mean is never stored.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderListing {
    /// Unique identifier for the listing.
    pub id: Uuid,
    /// Owning account (unique, at most one listing per account).
    pub account_id: Uuid,
    /// Display name of the provider.
    pub name: String,
    /// Service category key (electrician, plumber, tutor, others).
    pub service_key: String,
    /// Top-level location (e.g. district).
    pub location_parent: String,
    /// Optional sub-location (e.g. neighbourhood).
    pub location_sub: Option<String>,
    /// Contact details shown on the listing page.
    pub contact: String,
    /// Whether the listing is currently accepting work.
    pub available: bool,
    /// Mean review rating rounded to one decimal, 0.0 when unreviewed.
    pub rating: f64,
    /// Number of reviews contributing to the rating.
    pub rating_count: i64,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
}

/// Public list projection of a listing.
///
/// Excludes `contact` and `account_id` from search results.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
    /// Unique identifier for the listing.
    pub id: Uuid,
    /// Display name of the provider.
    pub name: String,
    /// Service category key.
    pub service_key: String,
    /// Top-level location.
    pub location_parent: String,
    /// Optional sub-location.
    pub location_sub: Option<String>,
    /// Mean review rating rounded to one decimal.
    pub rating: f64,
    /// Number of reviews contributing to the rating.
    pub rating_count: i64,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
}

/// An immutable review appended to a listing.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    /// Unique identifier for the review.
    pub id: Uuid,
    /// Listing the review belongs to.
    pub provider_id: Uuid,
    /// Account that submitted the review.
    pub reviewer_account_id: Uuid,
    /// Rating in the range 1.0 to 5.0.
    pub rating: f64,
    /// Optional free-text comment.
    pub comment: Option<String>,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
}

// ============ Domain Types ============

/// Known service categories for provider listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKey {
    Electrician,
    Plumber,
    Tutor,
    Others,
}

impl ServiceKey {
    /// Parses a service key from its wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "electrician" => Some(ServiceKey::Electrician),
            "plumber" => Some(ServiceKey::Plumber),
            "tutor" => Some(ServiceKey::Tutor),
            "others" => Some(ServiceKey::Others),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKey::Electrician => "electrician",
            ServiceKey::Plumber => "plumber",
            ServiceKey::Tutor => "tutor",
            ServiceKey::Others => "others",
        }
    }
}

// ============ Request / Response DTOs ============

/// Body of `PATCH /users/:uid/customer-role`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureCustomerRoleRequest {
    /// Phone number to attach to the account, if not already set.
    pub phone_number: Option<String>,
}

/// Identity block of a provider registration body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUser {
    /// External identity of the registering account; must match the caller.
    pub uid: String,
    /// Optional phone number for the account.
    pub phone_number: Option<String>,
}

/// Body of `POST /providers`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterProviderRequest {
    pub user: RegisterUser,
    pub name: String,
    pub service_key: String,
    pub location_parent: String,
    pub location_sub: Option<String>,
    pub contact: String,
}

/// Query parameters of `GET /providers`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFilter {
    pub service_key: Option<String>,
    pub location_parent: Option<String>,
}

/// Body of `PATCH /providers/:id/availability`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRequest {
    pub available: bool,
}

/// Body of `POST /reviews`.
///
/// `provider_id` is accepted as a string so a syntactically invalid id maps
/// to a 400 instead of a deserialization rejection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReviewRequest {
    pub provider_id: String,
    pub rating: f64,
    pub comment: Option<String>,
}

/// Query parameters of `GET /reviews/provider/:id`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewQuery {
    pub limit: Option<i64>,
}

/// Response of `GET /providers/by-uid/:uid` — existence check, never an error
/// on absence.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderLookup {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderListing>,
}
