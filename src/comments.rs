use serde::{Deserialize, Serialize};
use spin_sdk::http::{Request, Response};

use crate::auth::require_user;
use crate::config::*;
use crate::core::errors::ApiError;
use crate::core::helpers::{check_length, json, message, now, parse_body, sanitize_text};
use crate::core::store::{KeyValue, StoreError};
use crate::models::{Comment, UserSummary};
use crate::posts;
use crate::router::AppContext;
use crate::users;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCommentRequest {
    #[serde(default)]
    content: String,
    parent_id: Option<u64>,
}

#[derive(Serialize, Debug)]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: Comment,
    pub user: Option<UserSummary>,
}

pub fn load_comment(store: &dyn KeyValue, id: u64) -> Result<Option<Comment>, StoreError> {
    store.get_json(&comment_key(id))
}

/// Comments on a post, oldest first.
pub fn post_comments(store: &dyn KeyValue, post_id: u64) -> Result<Vec<Comment>, StoreError> {
    let mut comments = Vec::new();
    for id in store.get_ids(&post_comments_key(post_id))? {
        if let Some(c) = load_comment(store, id)? {
            comments.push(c);
        }
    }
    comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    Ok(comments)
}

pub fn comment_views(store: &dyn KeyValue, post_id: u64) -> Result<Vec<CommentView>, StoreError> {
    post_comments(store, post_id)?
        .into_iter()
        .map(|comment| {
            let user = users::load_user(store, comment.user_id)?.map(|u| UserSummary::from(&u));
            Ok(CommentView { comment, user })
        })
        .collect()
}

pub fn insert_comment(
    store: &dyn KeyValue,
    post_id: u64,
    user_id: u64,
    parent_id: Option<u64>,
    content: &str,
) -> Result<Comment, StoreError> {
    let comment = Comment {
        id: store.next_id("comments")?,
        post_id,
        user_id,
        parent_id,
        content: content.to_string(),
        created_at: now(),
    };
    store.set_json(&comment_key(comment.id), &comment)?;

    let list_key = post_comments_key(post_id);
    let mut ids = store.get_ids(&list_key)?;
    ids.push(comment.id);
    store.set_json(&list_key, &ids)?;

    Ok(comment)
}

/// Deletes a comment and its direct replies.
pub fn remove_comment(store: &dyn KeyValue, comment: &Comment) -> Result<usize, StoreError> {
    let list_key = post_comments_key(comment.post_id);
    let mut removed = Vec::new();

    for other in post_comments(store, comment.post_id)? {
        if other.id == comment.id || other.parent_id == Some(comment.id) {
            store.delete(&comment_key(other.id))?;
            removed.push(other.id);
        }
    }

    let mut ids = store.get_ids(&list_key)?;
    ids.retain(|id| !removed.contains(id));
    store.set_json(&list_key, &ids)?;

    Ok(removed.len())
}

pub fn remove_post_comments(store: &dyn KeyValue, post_id: u64) -> Result<(), StoreError> {
    let list_key = post_comments_key(post_id);
    for id in store.get_ids(&list_key)? {
        store.delete(&comment_key(id))?;
    }
    store.delete(&list_key)
}

fn validate_content(raw: &str) -> Result<String, ApiError> {
    let raw = raw.trim();
    check_length(raw, MAX_COMMENT_LENGTH, "Comment")?;
    let content = sanitize_text(raw);
    if content.is_empty() {
        return Err(ApiError::BadRequest("Comment content is required".to_string()));
    }
    Ok(content)
}

// === HTTP Handlers ===

pub fn create_comment(ctx: &AppContext, req: &Request, post_id: u64) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;
    let body: CreateCommentRequest = parse_body(req)?;
    let content = validate_content(&body.content)?;

    if posts::load_post(ctx.store, post_id)?.is_none() {
        return Err(ApiError::NotFound("Post not found".to_string()));
    }

    // Replies nest one level: the parent must be a top-level comment on this post
    if let Some(parent_id) = body.parent_id {
        let valid = load_comment(ctx.store, parent_id)?
            .is_some_and(|p| p.post_id == post_id && p.parent_id.is_none());
        if !valid {
            return Err(ApiError::BadRequest("Invalid parent comment".to_string()));
        }
    }

    let comment = insert_comment(ctx.store, post_id, user_id, body.parent_id, &content)?;
    tracing::info!(user_id, post_id, comment_id = comment.id, "comment added");

    let user = users::load_user(ctx.store, user_id)?.map(|u| UserSummary::from(&u));
    json(201, &CommentView { comment, user })
}

pub fn delete_comment(ctx: &AppContext, req: &Request, post_id: u64, comment_id: u64) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;

    let comment = load_comment(ctx.store, comment_id)?
        .filter(|c| c.post_id == post_id)
        .ok_or_else(|| ApiError::NotFound("Comment not found".to_string()))?;

    if comment.user_id != user_id {
        return Err(ApiError::Forbidden(
            "Not authorized to delete this comment".to_string(),
        ));
    }

    let removed = remove_comment(ctx.store, &comment)?;
    tracing::info!(user_id, post_id, comment_id, removed, "comment deleted");

    message(200, "Comment deleted successfully")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryKv;

    #[test]
    fn removing_a_comment_takes_its_replies() {
        let kv = MemoryKv::new();
        let store: &dyn KeyValue = &kv;

        let top = insert_comment(store, 1, 1, None, "nice").unwrap();
        let reply = insert_comment(store, 1, 2, Some(top.id), "thanks").unwrap();
        let other = insert_comment(store, 1, 2, None, "solid").unwrap();

        assert_eq!(remove_comment(store, &top).unwrap(), 2);

        let left: Vec<u64> = post_comments(store, 1).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(left, vec![other.id]);
        assert!(load_comment(store, reply.id).unwrap().is_none());
    }

    #[test]
    fn content_is_trimmed_and_bounded() {
        assert_eq!(validate_content("  great lift  ").unwrap(), "great lift");
        assert!(validate_content("   ").is_err());
        assert!(validate_content(&"x".repeat(MAX_COMMENT_LENGTH + 1)).is_err());
    }
}
