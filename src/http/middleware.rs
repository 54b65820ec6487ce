//! Authentication middleware and JWT verification

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::app::AppState;
use crate::util::time::unix_millis;

type HmacSha256 = Hmac<Sha256>;

/// Role that may read and reset violation history
pub const ADMIN_ROLE: &str = "admin";

/// JWT claims issued by the account service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (account ID)
    pub sub: Uuid,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: u64,
    /// Role
    #[serde(default)]
    pub role: Option<String>,
}

impl JwtClaims {
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some(ADMIN_ROLE)
    }
}

/// Verify an HS256 token and extract claims
pub fn verify_jwt(token: &str, secret: &str) -> Result<JwtClaims, AuthError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::InvalidToken);
    }

    let header_b64 = parts[0];
    let payload_b64 = parts[1];
    let signature_b64 = parts[2];

    let message = format!("{}.{}", header_b64, payload_b64);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AuthError::InvalidToken)?;
    mac.update(message.as_bytes());

    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    mac.verify_slice(&provided_signature)
        .map_err(|_| AuthError::InvalidToken)?;

    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;

    let claims: JwtClaims = serde_json::from_slice(&payload_json)
        .map_err(|_| AuthError::InvalidToken)?;

    let now = unix_millis() / 1000;
    if claims.exp < now {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

/// Extract JWT from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,

    #[error("Invalid authorization header format")]
    InvalidFormat,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Account banned")]
    Banned,

    #[error("Admin role required")]
    Forbidden,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::MissingHeader => StatusCode::UNAUTHORIZED,
            AuthError::InvalidFormat => StatusCode::BAD_REQUEST,
            AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::TokenExpired => StatusCode::UNAUTHORIZED,
            AuthError::Banned => StatusCode::FORBIDDEN,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
        };

        (status, self.to_string()).into_response()
    }
}

/// Authenticated admin, inserted into request extensions
#[derive(Debug, Clone)]
pub struct AuthenticatedAdmin {
    pub account_id: Uuid,
}

/// Middleware to require an admin token
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingHeader)?;

    let token = extract_bearer_token(auth_header).ok_or(AuthError::InvalidFormat)?;

    let claims = verify_jwt(token, &state.config.jwt_secret)?;
    if !claims.is_admin() {
        return Err(AuthError::Forbidden);
    }

    let admin = AuthenticatedAdmin {
        account_id: claims.sub,
    };

    request.extensions_mut().insert(admin);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(claims: &JwtClaims, secret: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", header, payload).as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{}.{}.{}", header, payload, signature)
    }

    fn claims(exp: u64, role: Option<&str>) -> JwtClaims {
        JwtClaims {
            sub: Uuid::new_v4(),
            exp,
            iat: 0,
            role: role.map(str::to_string),
        }
    }

    fn far_future() -> u64 {
        unix_millis() / 1000 + 3_600
    }

    #[test]
    fn test_valid_token_round_trip() {
        let c = claims(far_future(), Some("admin"));
        let token = sign(&c, "secret");
        let verified = verify_jwt(&token, "secret").unwrap();
        assert_eq!(verified.sub, c.sub);
        assert!(verified.is_admin());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = sign(&claims(far_future(), None), "secret");
        assert!(matches!(verify_jwt(&token, "other"), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = sign(&claims(1, None), "secret");
        assert!(matches!(verify_jwt(&token, "secret"), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn test_malformed_token_rejected() {
        assert!(matches!(verify_jwt("abc.def", "secret"), Err(AuthError::InvalidToken)));
        assert_eq!(extract_bearer_token("Bearer xyz"), Some("xyz"));
        assert_eq!(extract_bearer_token("Basic xyz"), None);
    }

    #[test]
    fn test_non_admin_role() {
        assert!(!claims(far_future(), Some("player")).is_admin());
        assert!(!claims(far_future(), None).is_admin());
    }
}
