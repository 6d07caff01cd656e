/*!
 * # Identity boundary
 *
 * Authentication happens upstream. The gateway forwards the verified caller
 * in two headers which this module turns into an [`Actor`]:
 *
 * - `x-actor-id`: the caller's UUID
 * - `x-actor-role`: `customer`, `store_owner` or `admin`
 *
 * Services receive the `Actor` explicitly and make every permission decision
 * themselves; nothing here consults the database.
 */

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    StoreOwner,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::StoreOwner => "store_owner",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "customer" => Ok(Role::Customer),
            "store_owner" | "owner" => Ok(Role::StoreOwner),
            "admin" => Ok(Role::Admin),
            other => Err(ServiceError::Unauthenticated(format!(
                "unknown actor role '{}'",
                other
            ))),
        }
    }
}

/// The verified caller of a service operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn customer(user_id: Uuid) -> Self {
        Self::new(user_id, Role::Customer)
    }

    pub fn store_owner(user_id: Uuid) -> Self {
        Self::new(user_id, Role::StoreOwner)
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self::new(user_id, Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// True when the actor owns `owner_id`'s resources or is an admin.
    pub fn acts_for_owner(&self, owner_id: Uuid) -> bool {
        self.is_admin() || self.user_id == owner_id
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, ServiceError> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| ServiceError::Unauthenticated(format!("missing {} header", name)))?
        .to_str()
        .map_err(|_| ServiceError::Unauthenticated(format!("malformed {} header", name)))
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = Uuid::parse_str(header_value(parts, ACTOR_ID_HEADER)?.trim())
            .map_err(|_| ServiceError::Unauthenticated("x-actor-id is not a UUID".to_string()))?;
        let role = header_value(parts, ACTOR_ROLE_HEADER)?.parse::<Role>()?;

        Ok(Actor { user_id, role })
    }
}
