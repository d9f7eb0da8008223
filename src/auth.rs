use serde::{Deserialize, Serialize};
use spin_sdk::http::{Request, Response};
use uuid::Uuid;

use crate::config::*;
use crate::core::errors::ApiError;
use crate::core::helpers::{hash_password, json, now, parse_body, verify_password};
use crate::models::{PublicUser, SessionData, User};
use crate::router::AppContext;
use crate::users::{self, NewUser};

#[derive(Deserialize)]
struct Credentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    bio: Option<String>,
    avatar: Option<String>,
    weekly_goal: Option<u32>,
    use_metric: Option<bool>,
}

/// Login/registration payload: the public user plus the session token, for
/// clients that prefer `Authorization: Bearer` over the cookie.
#[derive(Serialize)]
pub struct AuthResponse {
    #[serde(flatten)]
    pub user: PublicUser,
    pub token: String,
}

// === Sessions ===

/// Session token from the `connect.sid` cookie, falling back to a bearer
/// header.
pub fn session_token(req: &Request) -> Option<String> {
    if let Some(cookies) = req.header("cookie").and_then(|h| h.as_str()) {
        for pair in cookies.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                if name == SESSION_COOKIE && !value.is_empty() {
                    let decoded = urlencoding::decode(value)
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| value.to_string());
                    return Some(decoded);
                }
            }
        }
    }

    let auth_header = req.header("authorization").and_then(|h| h.as_str())?;
    auth_header
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Resolves a live session to `(token, user_id)`. Expired sessions are
/// deleted on sight.
pub fn resolve_session(ctx: &AppContext, req: &Request) -> Result<Option<(String, u64)>, ApiError> {
    let token = match session_token(req) {
        Some(t) => t,
        None => return Ok(None),
    };

    let key = session_key(&token);
    let data = match ctx.store.get_json::<SessionData>(&key)? {
        Some(d) => d,
        None => return Ok(None),
    };

    let age_hours = (now() - data.created_at).num_hours();
    if age_hours >= ctx.config.session_ttl_hours {
        tracing::warn!(user_id = data.user_id, age_hours, "rejecting expired session");
        destroy_session(ctx, &token, data.user_id)?;
        return Ok(None);
    }

    Ok(Some((token, data.user_id)))
}

/// The authenticated user's id, or 401.
pub fn require_user(ctx: &AppContext, req: &Request) -> Result<u64, ApiError> {
    let (_, user_id) = resolve_session(ctx, req)?.ok_or_else(ApiError::not_authenticated)?;

    // Check if user still exists
    if !ctx.store.exists(&user_key(user_id))? {
        return Err(ApiError::not_authenticated());
    }
    Ok(user_id)
}

pub fn create_session(ctx: &AppContext, user_id: u64) -> Result<String, ApiError> {
    let token = Uuid::new_v4().to_string();
    let data = SessionData {
        user_id,
        created_at: now(),
    };
    ctx.store.set_json(&session_key(&token), &data)?;

    let index_key = user_sessions_key(user_id);
    let mut tokens: Vec<String> = ctx.store.get_json(&index_key)?.unwrap_or_default();
    tokens.push(token.clone());
    ctx.store.set_json(&index_key, &tokens)?;

    Ok(token)
}

pub fn destroy_session(ctx: &AppContext, token: &str, user_id: u64) -> Result<(), ApiError> {
    ctx.store.delete(&session_key(token))?;

    let index_key = user_sessions_key(user_id);
    let mut tokens: Vec<String> = ctx.store.get_json(&index_key)?.unwrap_or_default();
    tokens.retain(|t| t != token);
    ctx.store.set_json(&index_key, &tokens)?;
    Ok(())
}

/// Drops every session of `user_id` except `keep`.
pub fn revoke_other_sessions(ctx: &AppContext, user_id: u64, keep: Option<&str>) -> Result<(), ApiError> {
    let index_key = user_sessions_key(user_id);
    let tokens: Vec<String> = ctx.store.get_json(&index_key)?.unwrap_or_default();

    let mut kept = Vec::new();
    for token in tokens {
        if Some(token.as_str()) == keep {
            kept.push(token);
        } else {
            ctx.store.delete(&session_key(&token))?;
        }
    }
    ctx.store.set_json(&index_key, &kept)?;
    Ok(())
}

pub(crate) fn session_cookie(ctx: &AppContext, token: &str) -> String {
    let max_age = ctx.config.session_ttl_hours * 3600;
    let secure = if ctx.config.cookie_secure { "; Secure" } else { "" };
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        SESSION_COOKIE, token, max_age, secure
    )
}

fn cleared_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

pub(crate) fn with_cookie<T: Serialize>(status: u16, body: &T, cookie: &str) -> Result<Response, ApiError> {
    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .header("set-cookie", cookie)
        .body(serde_json::to_vec(body)?)
        .build())
}

fn signed_in(ctx: &AppContext, status: u16, user: &User) -> Result<Response, ApiError> {
    let token = create_session(ctx, user.id)?;
    let body = AuthResponse {
        user: PublicUser::from(user),
        token: token.clone(),
    };
    with_cookie(status, &body, &session_cookie(ctx, &token))
}

// === HTTP Handlers ===

pub fn me(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let (token, user_id) = resolve_session(ctx, req)?.ok_or_else(ApiError::not_authenticated)?;

    match users::load_user(ctx.store, user_id)? {
        Some(user) => json(200, &PublicUser::from(&user)),
        None => {
            destroy_session(ctx, &token, user_id)?;
            Err(ApiError::Unauthorized("User not found".to_string()))
        }
    }
}

pub fn login_user(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let creds: Credentials = parse_body(req)?;

    let user = users::find_by_username(ctx.store, creds.username.trim())?
        .filter(|u| verify_password(&creds.password, &u.password));

    match user {
        Some(user) => {
            tracing::info!(user_id = user.id, username = %user.username, "user logged in");
            signed_in(ctx, 200, &user)
        }
        None => {
            tracing::info!(username = %creds.username, "login rejected");
            Err(ApiError::Unauthorized("Invalid username or password".to_string()))
        }
    }
}

pub fn register_user(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let body: RegisterRequest = parse_body(req)?;

    let username = body.username.trim();
    let email = body.email.trim();

    if username.is_empty() || email.is_empty() || body.password.is_empty() {
        return Err(ApiError::BadRequest(
            "Username, email and password are required".to_string(),
        ));
    }
    users::validate_username(username)?;
    users::validate_email(email)?;
    if body.password.len() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    if let Some(goal) = body.weekly_goal {
        users::validate_weekly_goal(goal)?;
    }
    if let Some(bio) = &body.bio {
        users::validate_bio(bio)?;
    }

    if users::find_by_username(ctx.store, username)?.is_some() {
        return Err(ApiError::BadRequest("Username already taken".to_string()));
    }
    if users::find_by_email(ctx.store, email)?.is_some() {
        return Err(ApiError::BadRequest("Email already registered".to_string()));
    }

    let user = users::insert_user(
        ctx.store,
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash_password(&body.password)?,
            avatar: body.avatar,
            bio: body.bio,
            weekly_goal: body.weekly_goal,
            use_metric: body.use_metric,
        },
    )?;
    tracing::info!(user_id = user.id, username = %user.username, "user registered");

    signed_in(ctx, 201, &user)
}

pub fn logout_user(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    if let Some((token, user_id)) = resolve_session(ctx, req)? {
        destroy_session(ctx, &token, user_id)?;
        tracing::info!(user_id, "user logged out");
    }

    with_cookie(
        200,
        &serde_json::json!({ "message": "Logged out successfully" }),
        &cleared_cookie(),
    )
}
