use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored user row. `password` holds an argon2 PHC string and never leaves
/// the server; responses use [`PublicUser`].
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,
    pub username: String,
    pub password: String,
    pub email: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub weekly_goal: u32,
    pub use_metric: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub weekly_goal: u32,
    pub use_metric: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        PublicUser {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            avatar: user.avatar.clone(),
            bio: user.bio.clone(),
            weekly_goal: user.weekly_goal,
            use_metric: user.use_metric,
            created_at: user.created_at,
        }
    }
}

/// Author block embedded in posts and comments.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UserSummary {
    pub id: u64,
    pub username: String,
    pub avatar: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        UserSummary {
            id: user.id,
            username: user.username.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub user_id: u64,
    pub created_at: DateTime<Utc>,
}
