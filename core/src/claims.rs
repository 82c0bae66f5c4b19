// Token claims and authorization scopes decoded from client bearer tokens.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeType {
    #[serde(rename = "doc:read")]
    DocRead,
    #[serde(rename = "doc:write")]
    DocWrite,
    #[serde(rename = "summary:write")]
    SummaryWrite,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::DocRead => "doc:read",
            ScopeType::DocWrite => "doc:write",
            ScopeType::SummaryWrite => "summary:write",
        }
    }
}

impl std::fmt::Display for ScopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn can_read<'a, I>(scopes: I) -> bool
where
    I: IntoIterator<Item = &'a ScopeType>,
{
    scopes.into_iter().any(|s| *s == ScopeType::DocRead)
}

pub fn can_write<'a, I>(scopes: I) -> bool
where
    I: IntoIterator<Item = &'a ScopeType>,
{
    scopes.into_iter().any(|s| *s == ScopeType::DocWrite)
}

pub fn can_summarize<'a, I>(scopes: I) -> bool
where
    I: IntoIterator<Item = &'a ScopeType>,
{
    scopes.into_iter().any(|s| *s == ScopeType::SummaryWrite)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Verified identity and authorization fields carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub document_id: String,
    pub tenant_id: String,
    pub scopes: Vec<ScopeType>,
    pub user: UserIdentity,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ver: Option<String>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Invalid token")]
    Malformed,
    #[error("DocumentId and/or TenantId mismatch")]
    ClaimMismatch,
    #[error("Expired token")]
    Expired,
    #[error("Token lifetime exceeds the configured maximum")]
    LifetimeTooLong,
}

impl TokenError {
    pub fn status(&self) -> u16 {
        match self {
            TokenError::ClaimMismatch => 403,
            TokenError::Malformed | TokenError::Expired | TokenError::LifetimeTooLong => 401,
        }
    }
}

/// Decodes the claims embedded in `token` and checks that they target the
/// expected document and tenant. Signature verification is the tenant
/// authority's job; this only inspects the payload.
pub fn validate_token_claims(
    token: &str,
    document_id: &str,
    tenant_id: &str,
) -> Result<TokenClaims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = Default::default();

    let data = decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|_| TokenError::Malformed)?;
    let claims = data.claims;

    if claims.document_id != document_id || claims.tenant_id != tenant_id {
        return Err(TokenError::ClaimMismatch);
    }

    if claims.exp * 1000 <= Utc::now().timestamp_millis() {
        return Err(TokenError::Expired);
    }

    Ok(claims)
}

/// Checks the token's total lifetime against `max_lifetime_secs` and returns
/// the remaining lifetime in milliseconds.
pub fn validate_token_claims_expiration(
    claims: &TokenClaims,
    max_lifetime_secs: i64,
) -> Result<i64, TokenError> {
    let lifetime = claims.exp - claims.iat;
    if lifetime > max_lifetime_secs {
        return Err(TokenError::LifetimeTooLong);
    }

    let remaining_ms = claims.exp * 1000 - Utc::now().timestamp_millis();
    if remaining_ms <= 0 {
        return Err(TokenError::Expired);
    }

    Ok(remaining_ms)
}
