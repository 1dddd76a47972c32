use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Resolved shopper identity for a request: either an authenticated customer
/// or an anonymous session token, never both.
///
/// Authentication itself happens upstream (a gateway validates credentials
/// and sets the headers); this type only threads the resolved identity
/// through handlers as an explicit value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShopperIdentity {
    Customer(Uuid),
    Session(String),
}

impl ShopperIdentity {
    pub fn customer_id(&self) -> Option<Uuid> {
        match self {
            Self::Customer(id) => Some(*id),
            Self::Session(_) => None,
        }
    }
}

pub const CUSTOMER_ID_HEADER: &str = "x-customer-id";
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

#[async_trait]
impl<S> FromRequestParts<S> for ShopperIdentity
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(raw) = parts.headers.get(CUSTOMER_ID_HEADER) {
            let raw = raw
                .to_str()
                .map_err(|_| ServiceError::Unauthorized("malformed customer id header".into()))?;
            let id = Uuid::parse_str(raw)
                .map_err(|_| ServiceError::Unauthorized("malformed customer id header".into()))?;
            return Ok(ShopperIdentity::Customer(id));
        }

        if let Some(token) = parts.headers.get(SESSION_TOKEN_HEADER) {
            let token = token
                .to_str()
                .map_err(|_| ServiceError::Unauthorized("malformed session token header".into()))?;
            if !token.is_empty() {
                return Ok(ShopperIdentity::Session(token.to_string()));
            }
        }

        Err(ServiceError::Unauthorized(
            "missing customer id or session token".into(),
        ))
    }
}
