use crate::errors::AppError;
use crate::handlers::AppState;
use axum::{extract::Request, extract::State, middleware::Next, response::Response};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Name of the session cookie accepted alongside `Authorization: Bearer`.
pub const SESSION_COOKIE: &str = "session";

/// Claims carried by a session token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject: the caller's external uid.
    pub sub: String,
    /// Phone number, when the issuer knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Expiration timestamp.
    pub exp: i64,
    /// Issued at timestamp.
    pub iat: i64,
    /// Issuer.
    pub iss: String,
}

/// Verified caller identity attached to request extensions by
/// [`attach_identity`].
///
/// Components downstream consume only this identity, never raw credentials.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub external_uid: String,
    pub phone_number: Option<String>,
}

/// Extension key for storing the (possibly absent) verified identity.
///
/// The middleware never blocks a request; endpoints that need a caller call
/// [`AuthContext::require`], which maps absence to a 401.
#[derive(Debug, Clone)]
pub struct AuthContext(pub Option<CallerIdentity>);

impl AuthContext {
    /// Returns the verified caller or an `Unauthorized` error.
    pub fn require(&self) -> Result<&CallerIdentity, AppError> {
        self.0
            .as_ref()
            .ok_or_else(|| AppError::Unauthorized("Valid session token required".to_string()))
    }
}

/// Verifies (and, for upstream issuers sharing the secret, mints) session
/// tokens. HS256 with issuer and expiry validation.
#[derive(Clone)]
pub struct SessionKeys {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl SessionKeys {
    pub fn new(secret: &str, issuer: String) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
        }
    }

    /// Mint a session token for an external uid.
    ///
    /// Token expires after 24 hours.
    pub fn issue(
        &self,
        external_uid: &str,
        phone_number: Option<String>,
    ) -> anyhow::Result<String> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(24);

        let claims = Claims {
            sub: external_uid.to_string(),
            phone_number,
            exp: exp.timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(Into::into)
    }

    /// Verify and decode a session token.
    ///
    /// Returns claims if the token is valid, unexpired, and from our issuer.
    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(Into::into)
    }
}

/// Middleware that verifies the session token and attaches the caller.
///
/// Reads the token from the `Authorization: Bearer` header first, then the
/// `session` cookie. An [`AuthContext`] is always inserted into request
/// extensions; it holds `None` when no valid token was presented. The
/// middleware itself never rejects — enforcement happens at the endpoints
/// that require a caller.
pub async fn attach_identity(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let caller = bearer_token(&request)
        .or_else(|| cookie_value(&request, SESSION_COOKIE))
        .and_then(|token| match state.sessions.verify(&token) {
            Ok(claims) => Some(CallerIdentity {
                external_uid: claims.sub,
                phone_number: claims.phone_number,
            }),
            Err(e) => {
                tracing::debug!("Session token rejected: {}", e);
                None
            }
        });

    request.extensions_mut().insert(AuthContext(caller));

    next.run(request).await
}

/// Extracts a bearer token from the Authorization header.
fn bearer_token(request: &Request) -> Option<String> {
    let header = request.headers().get(axum::http::header::AUTHORIZATION)?;
    let value = header.to_str().ok()?;
    value.strip_prefix("Bearer ").map(|t| t.trim().to_string())
}

/// Extracts a named cookie from the Cookie header.
fn cookie_value(request: &Request, name: &str) -> Option<String> {
    let header = request.headers().get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    value.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        if k == name && !v.is_empty() {
            Some(v.to_string())
        } else {
            None
        }
    })
}

/// Set-Cookie value that clears the session cookie.
pub fn clear_session_cookie() -> String {
    format!(
        "{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax",
        SESSION_COOKIE
    )
}
