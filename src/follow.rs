use spin_sdk::http::{Request, Response};

use crate::auth::require_user;
use crate::config::*;
use crate::core::errors::ApiError;
use crate::core::helpers::{json, message, now};
use crate::core::store::{KeyValue, StoreError};
use crate::models::{Follow, UserSummary};
use crate::router::AppContext;
use crate::users;

/// Records `follower_id -> following_id` on both sides. Returns false when
/// the edge already exists.
pub fn follow_user(store: &dyn KeyValue, follower_id: u64, following_id: u64) -> Result<bool, StoreError> {
    let followings_key = followings_key(follower_id);
    let mut followings: Vec<Follow> = store.get_json(&followings_key)?.unwrap_or_default();

    if followings.iter().any(|f| f.following_id == following_id) {
        return Ok(false);
    }

    let follow = Follow {
        id: store.next_id("follows")?,
        follower_id,
        following_id,
        created_at: now(),
    };

    let followers_key = followers_key(following_id);
    let mut followers: Vec<Follow> = store.get_json(&followers_key)?.unwrap_or_default();
    followers.retain(|f| f.follower_id != follower_id);
    followers.push(follow.clone());

    followings.push(follow);
    store.set_json(&followings_key, &followings)?;
    store.set_json(&followers_key, &followers)?;

    Ok(true)
}

pub fn unfollow_user(store: &dyn KeyValue, follower_id: u64, following_id: u64) -> Result<(), StoreError> {
    let followings_key = followings_key(follower_id);
    let mut followings: Vec<Follow> = store.get_json(&followings_key)?.unwrap_or_default();
    followings.retain(|f| f.following_id != following_id);
    store.set_json(&followings_key, &followings)?;

    let followers_key = followers_key(following_id);
    let mut followers: Vec<Follow> = store.get_json(&followers_key)?.unwrap_or_default();
    followers.retain(|f| f.follower_id != follower_id);
    store.set_json(&followers_key, &followers)?;

    Ok(())
}

pub fn is_following(store: &dyn KeyValue, follower_id: u64, following_id: u64) -> Result<bool, StoreError> {
    Ok(get_followings(store, follower_id)?.contains(&following_id))
}

/// Ids `user_id` follows, oldest edge first.
pub fn get_followings(store: &dyn KeyValue, user_id: u64) -> Result<Vec<u64>, StoreError> {
    let followings: Vec<Follow> = store.get_json(&followings_key(user_id))?.unwrap_or_default();
    Ok(followings.into_iter().map(|f| f.following_id).collect())
}

/// Ids following `user_id`, oldest edge first.
pub fn get_followers(store: &dyn KeyValue, user_id: u64) -> Result<Vec<u64>, StoreError> {
    let followers: Vec<Follow> = store.get_json(&followers_key(user_id))?.unwrap_or_default();
    Ok(followers.into_iter().map(|f| f.follower_id).collect())
}

fn summaries(store: &dyn KeyValue, ids: Vec<u64>) -> Result<Vec<UserSummary>, StoreError> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(user) = users::load_user(store, id)? {
            out.push(UserSummary::from(&user));
        }
    }
    Ok(out)
}

// === HTTP Handlers ===

pub fn handle_follow(ctx: &AppContext, req: &Request, target_user_id: u64) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;

    if target_user_id == user_id {
        return Err(ApiError::BadRequest("Cannot follow yourself".to_string()));
    }

    // Verify target user exists
    if users::load_user(ctx.store, target_user_id)?.is_none() {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    if !follow_user(ctx.store, user_id, target_user_id)? {
        return Err(ApiError::BadRequest("Already following this user".to_string()));
    }
    tracing::info!(follower = user_id, following = target_user_id, "followed user");

    message(201, "Successfully followed user")
}

pub fn handle_unfollow(ctx: &AppContext, req: &Request, target_user_id: u64) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;

    unfollow_user(ctx.store, user_id, target_user_id)?;

    message(200, "Successfully unfollowed user")
}

pub fn get_followings_list(ctx: &AppContext, req: &Request, user_id: u64) -> Result<Response, ApiError> {
    require_user(ctx, req)?;

    if users::load_user(ctx.store, user_id)?.is_none() {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    let followings = get_followings(ctx.store, user_id)?;
    json(200, &summaries(ctx.store, followings)?)
}

pub fn get_followers_list(ctx: &AppContext, req: &Request, user_id: u64) -> Result<Response, ApiError> {
    require_user(ctx, req)?;

    if users::load_user(ctx.store, user_id)?.is_none() {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    let followers = get_followers(ctx.store, user_id)?;
    json(200, &summaries(ctx.store, followers)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryKv;

    #[test]
    fn follow_edges_are_unique_and_two_sided() {
        let kv = MemoryKv::new();
        let store: &dyn KeyValue = &kv;

        assert!(follow_user(store, 1, 2).unwrap());
        assert!(!follow_user(store, 1, 2).unwrap());

        assert_eq!(get_followings(store, 1).unwrap(), vec![2]);
        assert_eq!(get_followers(store, 2).unwrap(), vec![1]);
        assert!(is_following(store, 1, 2).unwrap());
        assert!(!is_following(store, 2, 1).unwrap());

        unfollow_user(store, 1, 2).unwrap();
        assert!(get_followings(store, 1).unwrap().is_empty());
        assert!(get_followers(store, 2).unwrap().is_empty());
    }
}
