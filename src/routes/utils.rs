use axum::http::HeaderMap;
use uuid::Uuid;

use super::auth::AuthService;
use crate::error::{AppError, Result};

/// Resolves the `Authorization: Bearer <jwt>` header to a user id. Bare
/// tokens without the scheme prefix are accepted too.
pub fn validate_auth_token(headers: &HeaderMap, service: &AuthService) -> Result<Uuid> {
    let jwt_header_token = match headers.get("Authorization").map(|token| token.to_str()) {
        Some(Ok(token)) => token,
        _ => {
            return Err(AppError::Unauthorized);
        }
    };
    let token = jwt_header_token
        .strip_prefix("Bearer ")
        .unwrap_or(jwt_header_token);

    service.verify_token(token)
}

pub fn check_password(password: &str) -> Result<()> {
    let fail = |msg: &str| Err(AppError::Validation(msg.into()));

    if password.len() < 8 {
        return fail("Password must be at least 8 characters");
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return fail("Password must contain at least one uppercase letter");
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return fail("Password must contain at least one lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return fail("Password must contain at least one digit");
    }
    if !password.chars().any(|c| !c.is_alphanumeric()) {
        return fail("Password must contain at least one special character");
    }
    Ok(())
}
