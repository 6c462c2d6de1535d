//! Request authentication.
//!
//! Every API request names its tenant in `X-Tenant-Id`. In `jwt` mode the
//! request must also carry an HS256 bearer token whose `tenant_id` claim
//! matches that header; in `none` mode the header is trusted and the caller
//! holds every scope.

use crate::config::{AuthConfig, AuthMode};
use crate::error::{ApiError, ApiResult};
use axum::http::{header, HeaderMap};
use canon_service::Caller;
use canon_types::TenantId;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

pub const TENANT_HEADER: &str = "x-tenant-id";

pub const SCOPE_DECIDE: &str = "canon:decide";
pub const SCOPE_PROMOTE: &str = "canon:promote";
pub const SCOPE_READ: &str = "canon:read";
/// Grants every other scope.
pub const SCOPE_ADMIN: &str = "canon:admin";

const ANONYMOUS: &str = "anonymous";

/// Payload of an accepted bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub tenant_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub exp: u64,
}

pub struct Authenticator {
    mode: AuthMode,
    key: Option<DecodingKey>,
    validation: Validation,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Self {
            mode: config.mode,
            key: config
                .secret
                .as_deref()
                .map(|s| DecodingKey::from_secret(s.as_bytes())),
            validation,
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Resolve the caller for a request and check it holds `scope`.
    pub fn authenticate(&self, headers: &HeaderMap, scope: &str) -> ApiResult<Caller> {
        let tenant = tenant_header(headers)?;

        let caller = match self.mode {
            AuthMode::None => Caller::new(TenantId::new(tenant), ANONYMOUS).with_scopes([SCOPE_ADMIN]),
            AuthMode::Jwt => {
                let claims = self.verify(bearer_token(headers)?)?;
                if claims.tenant_id != tenant {
                    return Err(ApiError::TenantMismatch(format!(
                        "token is for tenant {}, request names {}",
                        claims.tenant_id, tenant
                    )));
                }
                Caller::new(TenantId::new(claims.tenant_id), claims.sub).with_scopes(claims.scopes)
            }
        };

        if !(caller.has_scope(scope) || caller.has_scope(SCOPE_ADMIN)) {
            return Err(ApiError::Forbidden(format!("missing scope {scope}")));
        }
        Ok(caller)
    }

    fn verify(&self, token: &str) -> ApiResult<Claims> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("jwt mode without a secret".to_string()))?;

        decode::<Claims>(token, key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| {
                use jsonwebtoken::errors::ErrorKind;
                let reason = match err.kind() {
                    ErrorKind::ExpiredSignature => "token expired",
                    ErrorKind::InvalidSignature => "invalid signature",
                    ErrorKind::InvalidIssuer => "invalid issuer",
                    ErrorKind::InvalidAudience => "invalid audience",
                    _ => "invalid token",
                };
                ApiError::Unauthorized(reason.to_string())
            })
    }
}

fn tenant_header(headers: &HeaderMap) -> ApiResult<&str> {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing X-Tenant-Id header".to_string()))
}

fn bearer_token(headers: &HeaderMap) -> ApiResult<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn jwt_config() -> AuthConfig {
        AuthConfig {
            mode: AuthMode::Jwt,
            secret: Some(SECRET.to_string()),
            issuer: None,
            audience: None,
        }
    }

    fn token(tenant: &str, scopes: &[&str]) -> String {
        let claims = Claims {
            sub: "alice".into(),
            tenant_id: tenant.into(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            exp: (chrono::Utc::now().timestamp() + 3600) as u64,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn headers(tenant: Option<&str>, bearer: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(t) = tenant {
            headers.insert(TENANT_HEADER, HeaderValue::from_str(t).unwrap());
        }
        if let Some(b) = bearer {
            headers.insert(
                header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {b}")).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn none_mode_trusts_the_tenant_header() {
        let auth = Authenticator::new(&AuthConfig::default());
        let caller = auth
            .authenticate(&headers(Some("acme"), None), SCOPE_DECIDE)
            .unwrap();
        assert_eq!(caller.tenant_id.as_str(), "acme");
    }

    #[test]
    fn missing_tenant_header_is_bad_request() {
        let auth = Authenticator::new(&AuthConfig::default());
        let err = auth.authenticate(&headers(None, None), SCOPE_READ).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn jwt_mode_checks_token_tenant_and_scope() {
        let auth = Authenticator::new(&jwt_config());

        let err = auth
            .authenticate(&headers(Some("acme"), None), SCOPE_READ)
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let err = auth
            .authenticate(&headers(Some("acme"), Some("not-a-jwt")), SCOPE_READ)
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let other = token("globex", &[SCOPE_READ]);
        let err = auth
            .authenticate(&headers(Some("acme"), Some(&other)), SCOPE_READ)
            .unwrap_err();
        assert!(matches!(err, ApiError::TenantMismatch(_)));

        let reader = token("acme", &[SCOPE_READ]);
        let err = auth
            .authenticate(&headers(Some("acme"), Some(&reader)), SCOPE_PROMOTE)
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        let caller = auth
            .authenticate(&headers(Some("acme"), Some(&reader)), SCOPE_READ)
            .unwrap();
        assert_eq!(caller.subject, "alice");
    }

    #[test]
    fn admin_scope_grants_everything() {
        let auth = Authenticator::new(&jwt_config());
        let admin = token("acme", &[SCOPE_ADMIN]);
        assert!(auth
            .authenticate(&headers(Some("acme"), Some(&admin)), SCOPE_PROMOTE)
            .is_ok());
    }
}
