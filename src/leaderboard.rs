use serde::Serialize;
use spin_sdk::http::{Request, Response};

use crate::auth::require_user;
use crate::core::errors::ApiError;
use crate::core::helpers::{default_avatar, json, now};
use crate::core::store::{KeyValue, StoreError};
use crate::follow;
use crate::router::AppContext;
use crate::stats;
use crate::users;
use crate::workouts;

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub id: u64,
    pub username: String,
    pub avatar: String,
    pub workouts: usize,
    pub is_current_user: bool,
}

/// The viewer and everyone they follow, ranked by workouts this week.
pub fn weekly_leaderboard(store: &dyn KeyValue, viewer_id: u64) -> Result<Vec<LeaderboardEntry>, StoreError> {
    let now = now();
    let mut ids = follow::get_followings(store, viewer_id)?;
    ids.push(viewer_id);
    ids.sort_unstable();
    ids.dedup();

    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        let user = match users::load_user(store, id)? {
            Some(u) => u,
            None => continue,
        };
        let list = workouts::user_workouts(store, id)?;
        rows.push(LeaderboardEntry {
            rank: 0,
            id,
            avatar: user.avatar.clone().unwrap_or_else(|| default_avatar(&user.username)),
            username: user.username,
            workouts: stats::weekly_count(&list, now),
            is_current_user: id == viewer_id,
        });
    }

    rows.sort_by(|a, b| {
        b.workouts
            .cmp(&a.workouts)
            .then_with(|| a.username.to_lowercase().cmp(&b.username.to_lowercase()))
    });
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i + 1;
    }
    Ok(rows)
}

pub fn get_leaderboard(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;
    json(200, &weekly_leaderboard(ctx.store, user_id)?)
}
