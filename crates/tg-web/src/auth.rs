//! Identity of the calling user.
//!
//! Authentication is handled by the fronting auth layer, which injects the
//! verified identity as headers. This extractor is the single choke point;
//! if the deployment ever moves to tokens, only this file changes.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};

const UID_HEADER: &str = "x-auth-uid";
const USERNAME_HEADER: &str = "x-auth-username";
const ROLES_HEADER: &str = "x-auth-roles";

#[derive(Debug, Clone, Default)]
pub struct CurrentUser {
    pub uid: i64,
    pub user_name: String,
    pub roles: Vec<String>,
    pub client_ip: String,
    pub cookie: String,
    pub accept_language: String,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        let roles = header(ROLES_HEADER)
            .split(',')
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        let client_ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()).map(str::to_string))
            .unwrap_or_default();

        Self {
            uid: header(UID_HEADER).parse().unwrap_or_default(),
            user_name: header(USERNAME_HEADER),
            roles,
            client_ip,
            cookie: header("cookie"),
            accept_language: header("accept-language"),
        }
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}
