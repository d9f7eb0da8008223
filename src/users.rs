use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use spin_sdk::http::{Request, Response};

use crate::auth::{self, require_user};
use crate::config::*;
use crate::core::errors::ApiError;
use crate::core::helpers::{
    default_avatar, hash_password, json, now, parse_body, sanitize_text, verify_password,
};
use crate::core::query_params::{get_string, parse_query_params};
use crate::core::store::{KeyValue, StoreError};
use crate::follow;
use crate::models::{PublicUser, User};
use crate::router::AppContext;
use crate::stats;
use crate::workouts;

pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub weekly_goal: Option<u32>,
    pub use_metric: Option<bool>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest {
    username: Option<String>,
    email: Option<String>,
    bio: Option<String>,
    avatar: Option<String>,
    weekly_goal: Option<u32>,
    use_metric: Option<bool>,
    current_password: Option<String>,
    new_password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserListEntry {
    #[serde(flatten)]
    user: PublicUser,
    is_following: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserDetails {
    #[serde(flatten)]
    user: PublicUser,
    workout_count: usize,
    follower_count: usize,
    following_count: usize,
    is_following: bool,
    current_streak: u32,
    weekly_workouts: usize,
    weekly_goal: u32,
}

// === Storage ===

pub fn load_user(store: &dyn KeyValue, id: u64) -> Result<Option<User>, StoreError> {
    store.get_json(&user_key(id))
}

pub fn all_users(store: &dyn KeyValue) -> Result<Vec<User>, StoreError> {
    let ids = store.get_ids(USERS_LIST_KEY)?;
    let mut users = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(u) = load_user(store, id)? {
            users.push(u);
        }
    }
    Ok(users)
}

pub fn find_by_username(store: &dyn KeyValue, username: &str) -> Result<Option<User>, StoreError> {
    let wanted = username.to_lowercase();
    Ok(all_users(store)?
        .into_iter()
        .find(|u| u.username.to_lowercase() == wanted))
}

pub fn find_by_email(store: &dyn KeyValue, email: &str) -> Result<Option<User>, StoreError> {
    let wanted = email.to_lowercase();
    Ok(all_users(store)?
        .into_iter()
        .find(|u| u.email.to_lowercase() == wanted))
}

/// Username or bio contains `term`, case-insensitively. An empty term
/// matches everyone.
pub fn search_users(store: &dyn KeyValue, term: &str) -> Result<Vec<User>, StoreError> {
    let term = term.trim().to_lowercase();
    let users = all_users(store)?;
    if term.is_empty() {
        return Ok(users);
    }

    Ok(users
        .into_iter()
        .filter(|u| {
            u.username.to_lowercase().contains(&term)
                || u.bio
                    .as_ref()
                    .map(|b| b.to_lowercase().contains(&term))
                    .unwrap_or(false)
        })
        .collect())
}

pub fn insert_user(store: &dyn KeyValue, new_user: NewUser) -> Result<User, StoreError> {
    let id = store.next_id("users")?;
    let user = User {
        id,
        avatar: new_user
            .avatar
            .filter(|a| !a.trim().is_empty())
            .or_else(|| Some(default_avatar(&new_user.username))),
        username: new_user.username,
        password: new_user.password_hash,
        email: new_user.email,
        bio: new_user
            .bio
            .map(|b| sanitize_text(&b))
            .filter(|b| !b.is_empty()),
        weekly_goal: new_user.weekly_goal.unwrap_or(DEFAULT_WEEKLY_GOAL),
        use_metric: new_user.use_metric.unwrap_or(true),
        created_at: now(),
    };

    store.set_json(&user_key(id), &user)?;

    let mut users = store.get_ids(USERS_LIST_KEY)?;
    users.push(id);
    store.set_json(USERS_LIST_KEY, &users)?;

    Ok(user)
}

pub fn save_user(store: &dyn KeyValue, user: &User) -> Result<(), StoreError> {
    store.set_json(&user_key(user.id), user)
}

// === Validation ===

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len) {
        return Err(ApiError::BadRequest(format!(
            "Username must be {}-{} characters",
            MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(ApiError::BadRequest(
            "Username may only contain letters, digits, '_', '-' and '.'".to_string(),
        ));
    }
    Ok(())
}

fn email_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s.]+(\.[^@\s.]+)+$").expect("Regex should compile")
    })
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    if !email_regex().is_match(email) {
        return Err(ApiError::BadRequest("Please enter a valid email".to_string()));
    }
    Ok(())
}

pub fn validate_weekly_goal(goal: u32) -> Result<(), ApiError> {
    if !(1..=7).contains(&goal) {
        return Err(ApiError::BadRequest(
            "Weekly goal must be between 1 and 7".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_bio(bio: &str) -> Result<(), ApiError> {
    if bio.chars().count() > MAX_BIO_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Bio too long (max {} chars)",
            MAX_BIO_LENGTH
        )));
    }
    Ok(())
}

// === HTTP Handlers ===

pub fn list_users(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let me = require_user(ctx, req)?;

    let params = parse_query_params(req.uri());
    let search = get_string(&params, "search", None).unwrap_or_default();

    let mut entries = Vec::new();
    for user in search_users(ctx.store, &search)? {
        entries.push(UserListEntry {
            is_following: follow::is_following(ctx.store, me, user.id)?,
            user: PublicUser::from(&user),
        });
    }

    json(200, &entries)
}

pub fn get_user_details(ctx: &AppContext, req: &Request, user_id: u64) -> Result<Response, ApiError> {
    let me = require_user(ctx, req)?;

    let user = load_user(ctx.store, user_id)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let workouts = workouts::user_workouts(ctx.store, user_id)?;
    let now = now();

    let details = UserDetails {
        workout_count: workouts.len(),
        follower_count: follow::get_followers(ctx.store, user_id)?.len(),
        following_count: follow::get_followings(ctx.store, user_id)?.len(),
        is_following: follow::is_following(ctx.store, me, user_id)?,
        current_streak: stats::current_streak(&workouts, now.date_naive()),
        weekly_workouts: stats::weekly_count(&workouts, now),
        weekly_goal: user.weekly_goal,
        user: PublicUser::from(&user),
    };

    json(200, &details)
}

pub fn update_profile(ctx: &AppContext, req: &Request, user_id: u64) -> Result<Response, ApiError> {
    let me = require_user(ctx, req)?;
    if me != user_id {
        return Err(ApiError::Forbidden(
            "Not authorized to update this profile".to_string(),
        ));
    }

    let mut user = load_user(ctx.store, user_id)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    let body: UpdateProfileRequest = parse_body(req)?;

    if let Some(username) = body.username.as_deref().map(str::trim) {
        if username != user.username {
            validate_username(username)?;
            if find_by_username(ctx.store, username)?.is_some_and(|u| u.id != user.id) {
                return Err(ApiError::BadRequest("Username already taken".to_string()));
            }
            user.username = username.to_string();
        }
    }

    if let Some(email) = body.email.as_deref().map(str::trim) {
        if email != user.email {
            validate_email(email)?;
            if find_by_email(ctx.store, email)?.is_some_and(|u| u.id != user.id) {
                return Err(ApiError::BadRequest("Email already registered".to_string()));
            }
            user.email = email.to_string();
        }
    }

    if let Some(bio) = body.bio.as_deref() {
        validate_bio(bio)?;
        let sanitized_bio = sanitize_text(bio);
        user.bio = if sanitized_bio.is_empty() { None } else { Some(sanitized_bio) };
    }

    if let Some(avatar) = body.avatar {
        user.avatar = if avatar.trim().is_empty() {
            Some(default_avatar(&user.username))
        } else {
            Some(avatar)
        };
    }

    if let Some(goal) = body.weekly_goal {
        validate_weekly_goal(goal)?;
        user.weekly_goal = goal;
    }

    if let Some(use_metric) = body.use_metric {
        user.use_metric = use_metric;
    }

    let mut password_changed = false;
    if let Some(new_password) = body.new_password.as_deref() {
        if new_password.len() < MIN_PASSWORD_LENGTH {
            return Err(ApiError::BadRequest(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }
        let current = body
            .current_password
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("Current password required".to_string()))?;
        if !verify_password(current, &user.password) {
            return Err(ApiError::Unauthorized("Current password is incorrect".to_string()));
        }
        user.password = hash_password(new_password)?;
        password_changed = true;
    }

    save_user(ctx.store, &user)?;
    tracing::info!(user_id, password_changed, "profile updated");

    // A password change signs out every other device and issues a fresh session
    if password_changed {
        auth::revoke_other_sessions(ctx, user_id, None)?;
        let token = auth::create_session(ctx, user_id)?;
        let body = auth::AuthResponse {
            user: PublicUser::from(&user),
            token: token.clone(),
        };
        return auth::with_cookie(200, &body, &auth::session_cookie(ctx, &token));
    }

    json(200, &PublicUser::from(&user))
}

pub fn get_activity(ctx: &AppContext, req: &Request, user_id: u64) -> Result<Response, ApiError> {
    require_user(ctx, req)?;

    if load_user(ctx.store, user_id)?.is_none() {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    let workouts = workouts::user_workouts(ctx.store, user_id)?;
    json(200, &stats::monthly_activity(&workouts, now()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_are_length_and_charset_checked() {
        assert!(validate_username("johndoe").is_ok());
        assert!(validate_username("j.doe-99_x").is_ok());
        assert!(validate_username("jo").is_err());
        assert!(validate_username("john doe").is_err());
        assert!(validate_username(&"a".repeat(MAX_USERNAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn emails_need_a_local_part_and_dotted_domain() {
        assert!(validate_email("john@example.com").is_ok());
        assert!(validate_email("john@example").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("john example.com").is_err());
        assert!(validate_email("john@.com").is_err());
        assert!(validate_email("john@example.com.").is_err());
        assert!(validate_email("john@doe@example.com").is_err());
        assert!(validate_email("jane.doe+gym@mail.example.co").is_ok());
    }

    #[test]
    fn weekly_goal_is_one_to_seven() {
        assert!(validate_weekly_goal(1).is_ok());
        assert!(validate_weekly_goal(7).is_ok());
        assert!(validate_weekly_goal(0).is_err());
        assert!(validate_weekly_goal(8).is_err());
    }
}
