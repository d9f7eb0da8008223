use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: u64,
    pub user_id: u64,
    pub workout_id: Option<u64>,
    pub content: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: u64,
    pub post_id: u64,
    pub user_id: u64,
    pub parent_id: Option<u64>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    pub id: u64,
    pub user_id: u64,
    pub post_id: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Follow {
    pub id: u64,
    pub follower_id: u64,
    pub following_id: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProgramRating {
    pub id: u64,
    pub program_id: u64,
    pub user_id: u64,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}
