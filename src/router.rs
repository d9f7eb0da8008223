use serde::Serialize;
use spin_sdk::http::{Method, Request, Response};

use crate::analysis::{self, CompletionClient};
use crate::auth;
use crate::comments;
use crate::config::Config;
use crate::core::errors::ApiError;
use crate::core::helpers::{json, now, parse_id};
use crate::core::store::KeyValue;
use crate::follow;
use crate::leaderboard;
use crate::posts;
use crate::programs;
use crate::stats;
use crate::users;
use crate::workouts;

/// What every handler needs: storage, settings and the completion backend.
pub struct AppContext<'a> {
    pub store: &'a dyn KeyValue,
    pub config: &'a Config,
    pub ai: &'a dyn CompletionClient,
}

#[derive(Serialize)]
struct Health {
    message: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// Dispatches one request. Errors become JSON `{"message"}` responses.
pub async fn handle(ctx: &AppContext<'_>, req: Request) -> Response {
    let method = req.method().to_string();
    let path = req.path().to_string();

    let response = match dispatch(ctx, &req).await {
        Ok(resp) => resp,
        Err(err) => {
            if !matches!(err, ApiError::InternalError(_)) {
                tracing::debug!(%method, %path, error = %err, "request rejected");
            }
            err.into()
        }
    };

    tracing::info!(%method, %path, status = *response.status(), "request handled");
    response
}

async fn dispatch(ctx: &AppContext<'_>, req: &Request) -> Result<Response, ApiError> {
    let segments: Vec<&str> = req.path().split('/').filter(|s| !s.is_empty()).collect();

    match (req.method(), segments.as_slice()) {
        (Method::Get, ["api", "test"]) => json(
            200,
            &Health {
                message: "API is working",
                timestamp: now(),
            },
        ),

        // Auth
        (Method::Get, ["api", "auth", "me"]) => auth::me(ctx, req),
        (Method::Post, ["api", "auth", "login"]) => auth::login_user(ctx, req),
        (Method::Post, ["api", "auth", "register"]) => auth::register_user(ctx, req),
        (Method::Post, ["api", "auth", "logout"]) => auth::logout_user(ctx, req),

        // Users & follows
        (Method::Get, ["api", "users"]) => users::list_users(ctx, req),
        (Method::Get, ["api", "users", id]) => users::get_user_details(ctx, req, parse_id(id)?),
        (Method::Patch, ["api", "users", id]) => users::update_profile(ctx, req, parse_id(id)?),
        (Method::Post, ["api", "users", id, "follow"]) => follow::handle_follow(ctx, req, parse_id(id)?),
        (Method::Delete, ["api", "users", id, "follow"]) => follow::handle_unfollow(ctx, req, parse_id(id)?),
        (Method::Get, ["api", "users", id, "followers"]) => follow::get_followers_list(ctx, req, parse_id(id)?),
        (Method::Get, ["api", "users", id, "following"]) => follow::get_followings_list(ctx, req, parse_id(id)?),
        (Method::Get, ["api", "users", id, "activity"]) => users::get_activity(ctx, req, parse_id(id)?),
        (Method::Get, ["api", "users", id, "posts"]) => posts::user_posts(ctx, req, parse_id(id)?),

        // Workouts
        (Method::Get, ["api", "workouts"]) => workouts::list_workouts(ctx, req),
        (Method::Post, ["api", "workouts"]) => workouts::create_workout(ctx, req),
        (Method::Get, ["api", "workouts", "stats"]) => stats::workout_stats(ctx, req),
        (Method::Get, ["api", "workouts", "templates"]) => workouts::list_templates(ctx, req),
        (Method::Get, ["api", "workouts", "upcoming"]) => workouts::list_upcoming(ctx, req),
        (Method::Get, ["api", "workouts", id]) => workouts::get_workout(ctx, req, parse_id(id)?),
        (Method::Patch, ["api", "workouts", id]) => workouts::update_workout(ctx, req, parse_id(id)?),
        (Method::Delete, ["api", "workouts", id]) => workouts::delete_workout(ctx, req, parse_id(id)?),

        // Posts, likes & comments
        (Method::Get, ["api", "posts"]) => posts::list_posts(ctx, req),
        (Method::Post, ["api", "posts"]) => posts::create_post(ctx, req),
        (Method::Get, ["api", "posts", id]) => posts::get_post(ctx, req, parse_id(id)?),
        (Method::Delete, ["api", "posts", id]) => posts::delete_post(ctx, req, parse_id(id)?),
        (Method::Post, ["api", "posts", id, "like"]) => posts::handle_like(ctx, req, parse_id(id)?),
        (Method::Delete, ["api", "posts", id, "like"]) => posts::handle_unlike(ctx, req, parse_id(id)?),
        (Method::Post, ["api", "posts", id, "comments"]) => comments::create_comment(ctx, req, parse_id(id)?),
        (Method::Delete, ["api", "posts", post_id, "comments", comment_id]) => {
            comments::delete_comment(ctx, req, parse_id(post_id)?, parse_id(comment_id)?)
        }

        // Metrics
        (Method::Get, ["api", "metrics", "workout"]) => stats::workout_metrics(ctx, req),
        (Method::Get, ["api", "metrics", "exercises"]) => stats::exercise_metrics(ctx, req),

        // Programs
        (Method::Get, ["api", "programs"]) => programs::list_programs(ctx, req),
        (Method::Get, ["api", "programs", "trending"]) => programs::list_trending(ctx, req),
        (Method::Get, ["api", "programs", id]) => programs::get_program(ctx, req, parse_id(id)?),
        (Method::Post, ["api", "programs", id, "ratings"]) => programs::create_rating(ctx, req, parse_id(id)?),

        (Method::Get, ["api", "leaderboard"]) => leaderboard::get_leaderboard(ctx, req),
        (Method::Get, ["api", "analysis", "workouts"]) => analysis::workout_analysis(ctx, req).await,

        _ => Err(ApiError::NotFound("Not found".to_string())),
    }
}
