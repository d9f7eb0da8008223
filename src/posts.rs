use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use spin_sdk::http::{Request, Response};

use crate::auth::require_user;
use crate::comments::{self, CommentView};
use crate::config::*;
use crate::core::errors::ApiError;
use crate::core::helpers::{check_length, json, message, now, parse_body, sanitize_text};
use crate::core::query_params::{get_bool_flag, get_int, parse_query_params};
use crate::core::store::{KeyValue, StoreError};
use crate::follow;
use crate::models::{Like, Post, UserSummary};
use crate::router::AppContext;
use crate::users;
use crate::workouts::{self, duration_label};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePostRequest {
    #[serde(default)]
    content: String,
    workout_id: Option<u64>,
    image: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutSummary {
    pub id: u64,
    pub name: String,
    pub duration: String,
    pub volume: f64,
    pub exercise_count: usize,
}

/// A post as clients render it: author, attached workout, comments and
/// like state for the viewer.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    pub user: Option<UserSummary>,
    pub workout: Option<WorkoutSummary>,
    pub comments: Vec<CommentView>,
    pub comment_count: usize,
    pub like_count: usize,
    pub liked: bool,
}

fn image_url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^https?://[^\s<>]+$").expect("Regex should compile"))
}

// === Storage ===

pub fn load_post(store: &dyn KeyValue, id: u64) -> Result<Option<Post>, StoreError> {
    store.get_json(&post_key(id))
}

/// Every post, newest first.
pub fn all_posts(store: &dyn KeyValue) -> Result<Vec<Post>, StoreError> {
    let mut posts = Vec::new();
    for id in store.get_ids(POSTS_LIST_KEY)? {
        if let Some(p) = load_post(store, id)? {
            posts.push(p);
        }
    }
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    Ok(posts)
}

pub fn insert_post(
    store: &dyn KeyValue,
    user_id: u64,
    workout_id: Option<u64>,
    content: &str,
    image: Option<String>,
) -> Result<Post, StoreError> {
    let post = Post {
        id: store.next_id("posts")?,
        user_id,
        workout_id,
        content: content.to_string(),
        image,
        created_at: now(),
    };
    store.set_json(&post_key(post.id), &post)?;

    let mut feed = store.get_ids(POSTS_LIST_KEY)?;
    feed.insert(0, post.id);
    store.set_json(POSTS_LIST_KEY, &feed)?;

    Ok(post)
}

/// Deletes a post along with its comments and likes.
pub fn remove_post(store: &dyn KeyValue, post: &Post) -> Result<(), StoreError> {
    comments::remove_post_comments(store, post.id)?;
    store.delete(&likes_key(post.id))?;

    let mut feed = store.get_ids(POSTS_LIST_KEY)?;
    feed.retain(|id| *id != post.id);
    store.set_json(POSTS_LIST_KEY, &feed)?;

    store.delete(&post_key(post.id))
}

pub fn post_likes(store: &dyn KeyValue, post_id: u64) -> Result<Vec<Like>, StoreError> {
    Ok(store.get_json(&likes_key(post_id))?.unwrap_or_default())
}

/// Returns false when the user had already liked the post.
pub fn like_post(store: &dyn KeyValue, user_id: u64, post_id: u64) -> Result<bool, StoreError> {
    let mut likes = post_likes(store, post_id)?;
    if likes.iter().any(|l| l.user_id == user_id) {
        return Ok(false);
    }

    likes.push(Like {
        id: store.next_id("likes")?,
        user_id,
        post_id,
        created_at: now(),
    });
    store.set_json(&likes_key(post_id), &likes)?;
    Ok(true)
}

pub fn unlike_post(store: &dyn KeyValue, user_id: u64, post_id: u64) -> Result<(), StoreError> {
    let mut likes = post_likes(store, post_id)?;
    likes.retain(|l| l.user_id != user_id);
    store.set_json(&likes_key(post_id), &likes)
}

fn workout_summary(store: &dyn KeyValue, workout_id: u64) -> Result<Option<WorkoutSummary>, StoreError> {
    let workout = match workouts::load_workout(store, workout_id)? {
        Some(w) => w,
        None => return Ok(None),
    };
    let detail = workouts::workout_detail(store, workout)?;

    Ok(Some(WorkoutSummary {
        id: detail.workout.id,
        duration: duration_label(detail.workout.start_time, detail.workout.end_time),
        volume: detail.volume().round(),
        exercise_count: detail.exercises.len(),
        name: detail.workout.name,
    }))
}

pub fn enrich_post(store: &dyn KeyValue, post: Post, viewer_id: u64) -> Result<PostView, StoreError> {
    let user = users::load_user(store, post.user_id)?.map(|u| UserSummary::from(&u));
    // A deleted workout leaves the post standing without its summary
    let workout = match post.workout_id {
        Some(id) => workout_summary(store, id)?,
        None => None,
    };
    let comments = comments::comment_views(store, post.id)?;
    let likes = post_likes(store, post.id)?;

    Ok(PostView {
        user,
        workout,
        comment_count: comments.len(),
        comments,
        like_count: likes.len(),
        liked: likes.iter().any(|l| l.user_id == viewer_id),
        post,
    })
}

fn enrich_all(store: &dyn KeyValue, posts: Vec<Post>, viewer_id: u64) -> Result<Vec<PostView>, StoreError> {
    posts
        .into_iter()
        .map(|p| enrich_post(store, p, viewer_id))
        .collect()
}

fn paginate(posts: Vec<Post>, page: Option<usize>) -> Vec<Post> {
    match page {
        Some(page) => posts
            .into_iter()
            .skip((page - 1).saturating_mul(POSTS_PER_PAGE))
            .take(POSTS_PER_PAGE)
            .collect(),
        None => posts,
    }
}

/// Posts by the viewer and everyone they follow, newest first.
pub fn feed_posts(store: &dyn KeyValue, viewer_id: u64, page: Option<usize>) -> Result<Vec<PostView>, StoreError> {
    let mut authors: HashSet<u64> = follow::get_followings(store, viewer_id)?.into_iter().collect();
    authors.insert(viewer_id);

    let posts: Vec<Post> = all_posts(store)?
        .into_iter()
        .filter(|p| authors.contains(&p.user_id))
        .collect();

    enrich_all(store, paginate(posts, page), viewer_id)
}

fn validate_post(ctx: &AppContext, user_id: u64, body: CreatePostRequest) -> Result<(String, Option<u64>, Option<String>), ApiError> {
    let raw = body.content.trim();
    check_length(raw, MAX_POST_LENGTH, "Post")?;
    let content = sanitize_text(raw);
    if content.is_empty() {
        return Err(ApiError::BadRequest("Post content is required".to_string()));
    }

    if let Some(workout_id) = body.workout_id {
        let owned = workouts::load_workout(ctx.store, workout_id)?.is_some_and(|w| w.user_id == user_id);
        if !owned {
            return Err(ApiError::BadRequest("Invalid workout".to_string()));
        }
    }

    let image = match body.image.map(|i| i.trim().to_string()).filter(|i| !i.is_empty()) {
        Some(url) if image_url_regex().is_match(&url) => Some(url),
        Some(_) => return Err(ApiError::BadRequest("Invalid image URL".to_string())),
        None => None,
    };

    Ok((content, body.workout_id, image))
}

// === HTTP Handlers ===

pub fn list_posts(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;

    let params = parse_query_params(req.uri());
    let page = params.contains_key("page").then(|| get_int(&params, "page", 1));

    let views = if get_bool_flag(&params, "all") {
        enrich_all(ctx.store, paginate(all_posts(ctx.store)?, page), user_id)?
    } else {
        feed_posts(ctx.store, user_id, page)?
    };

    json(200, &views)
}

pub fn create_post(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;
    let body: CreatePostRequest = parse_body(req)?;
    let (content, workout_id, image) = validate_post(ctx, user_id, body)?;

    let post = insert_post(ctx.store, user_id, workout_id, &content, image)?;
    tracing::info!(user_id, post_id = post.id, "post created");

    json(201, &post)
}

pub fn get_post(ctx: &AppContext, req: &Request, post_id: u64) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;

    let post = load_post(ctx.store, post_id)?
        .ok_or_else(|| ApiError::NotFound("Post not found".to_string()))?;

    json(200, &enrich_post(ctx.store, post, user_id)?)
}

pub fn delete_post(ctx: &AppContext, req: &Request, post_id: u64) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;

    let post = load_post(ctx.store, post_id)?
        .ok_or_else(|| ApiError::NotFound("Post not found".to_string()))?;
    if post.user_id != user_id {
        return Err(ApiError::Forbidden("Not authorized to delete this post".to_string()));
    }

    remove_post(ctx.store, &post)?;
    tracing::info!(user_id, post_id, "post deleted");

    message(200, "Post deleted successfully")
}

pub fn handle_like(ctx: &AppContext, req: &Request, post_id: u64) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;

    if load_post(ctx.store, post_id)?.is_none() {
        return Err(ApiError::NotFound("Post not found".to_string()));
    }
    if !like_post(ctx.store, user_id, post_id)? {
        return Err(ApiError::BadRequest("Post already liked".to_string()));
    }

    message(201, "Post liked successfully")
}

pub fn handle_unlike(ctx: &AppContext, req: &Request, post_id: u64) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;

    unlike_post(ctx.store, user_id, post_id)?;

    message(200, "Post unliked successfully")
}

pub fn user_posts(ctx: &AppContext, req: &Request, author_id: u64) -> Result<Response, ApiError> {
    let viewer_id = require_user(ctx, req)?;

    if users::load_user(ctx.store, author_id)?.is_none() {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    let posts: Vec<Post> = all_posts(ctx.store)?
        .into_iter()
        .filter(|p| p.user_id == author_id)
        .collect();

    json(200, &enrich_all(ctx.store, posts, viewer_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryKv;

    #[test]
    fn likes_are_unique_per_user() {
        let kv = MemoryKv::new();
        let store: &dyn KeyValue = &kv;
        let post = insert_post(store, 1, None, "first", None).unwrap();

        assert!(like_post(store, 2, post.id).unwrap());
        assert!(!like_post(store, 2, post.id).unwrap());
        assert!(like_post(store, 3, post.id).unwrap());
        assert_eq!(post_likes(store, post.id).unwrap().len(), 2);

        unlike_post(store, 2, post.id).unwrap();
        unlike_post(store, 2, post.id).unwrap();
        assert_eq!(post_likes(store, post.id).unwrap().len(), 1);
    }

    #[test]
    fn removing_a_post_clears_comments_and_likes() {
        let kv = MemoryKv::new();
        let store: &dyn KeyValue = &kv;
        let post = insert_post(store, 1, None, "first", None).unwrap();
        let comment = comments::insert_comment(store, post.id, 2, None, "nice").unwrap();
        like_post(store, 2, post.id).unwrap();

        remove_post(store, &post).unwrap();

        assert!(load_post(store, post.id).unwrap().is_none());
        assert!(comments::load_comment(store, comment.id).unwrap().is_none());
        assert!(post_likes(store, post.id).unwrap().is_empty());
        assert!(all_posts(store).unwrap().is_empty());
    }

    #[test]
    fn feed_holds_own_and_followed_posts_newest_first() {
        let kv = MemoryKv::new();
        let store: &dyn KeyValue = &kv;
        follow::follow_user(store, 1, 2).unwrap();

        let own = insert_post(store, 1, None, "mine", None).unwrap();
        let followed = insert_post(store, 2, None, "theirs", None).unwrap();
        insert_post(store, 3, None, "stranger", None).unwrap();

        let ids: Vec<u64> = feed_posts(store, 1, None).unwrap().iter().map(|v| v.post.id).collect();
        assert_eq!(ids, vec![followed.id, own.id]);
    }

    #[test]
    fn pages_hold_twenty_posts() {
        let kv = MemoryKv::new();
        let store: &dyn KeyValue = &kv;
        for i in 0..25 {
            insert_post(store, 1, None, &format!("post {}", i), None).unwrap();
        }

        assert_eq!(feed_posts(store, 1, Some(1)).unwrap().len(), POSTS_PER_PAGE);
        assert_eq!(feed_posts(store, 1, Some(2)).unwrap().len(), 5);
        assert_eq!(feed_posts(store, 1, None).unwrap().len(), 25);
    }

    #[test]
    fn pages_past_the_end_are_empty() {
        let kv = MemoryKv::new();
        let store: &dyn KeyValue = &kv;
        insert_post(store, 1, None, "only", None).unwrap();

        assert!(feed_posts(store, 1, Some(3)).unwrap().is_empty());
        assert!(feed_posts(store, 1, Some(usize::MAX)).unwrap().is_empty());
    }
}
