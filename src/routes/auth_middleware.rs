use axum::{extract::Request, http, http::StatusCode, middleware::Next, response::Response};
use tracing::error;

use crate::auth::validate_jwt;
use crate::config;

// Get the auth token from a request
pub fn get_auth_token<B>(req: &http::Request<B>) -> Result<String, String> {
    let auth_header = req
        .headers()
        .get(http::header::AUTHORIZATION)
        .ok_or_else(|| "Missing Authorization header".to_string())?;
    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header".to_string())?;
    Ok(auth_str
        .strip_prefix("Bearer ")
        .unwrap_or(auth_str)
        .to_string())
}

pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    // 1. Get the auth token from the request
    let token = match get_auth_token(&req) {
        Ok(token) => token,
        Err(_) => return Err(StatusCode::UNAUTHORIZED),
    };

    // 2. Validate Token
    let config = config::get_config();
    let secret = match &config.auth_jwt_secret {
        Some(secret) => secret,
        None => {
            error!("Auth JWT secret not configured");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let token_data = match validate_jwt(&token, secret) {
        Ok(token_data) => token_data,
        Err(e) => {
            error!("JWT validation failed: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // 3. Extract the UID and expose it to downstream handlers
    let user_uid = if let Some(sub) = token_data.claims.get("sub").and_then(|v| v.as_str()) {
        sub.to_string()
    } else {
        error!("JWT token does not contain 'sub' claim");
        return Err(StatusCode::UNAUTHORIZED);
    };
    req.extensions_mut().insert(user_uid);

    // Token is valid, proceed to next middleware/handler
    Ok(next.run(req).await)
}
