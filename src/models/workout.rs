use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Workout {
    pub id: u64,
    pub user_id: u64,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub use_metric: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub id: u64,
    pub workout_id: u64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One logged set. Strength sets carry weight/reps, cardio sets
/// duration (seconds) and distance.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutSet {
    pub id: u64,
    pub exercise_id: u64,
    pub weight: Option<f64>,
    pub reps: Option<u32>,
    pub duration: Option<u32>,
    pub distance: Option<f64>,
    pub rpe: Option<u8>,
    pub created_at: DateTime<Utc>,
}

impl WorkoutSet {
    /// weight x reps, or zero unless both are recorded.
    pub fn volume(&self) -> f64 {
        match (self.weight, self.reps) {
            (Some(weight), Some(reps)) => weight * f64::from(reps),
            _ => 0.0,
        }
    }
}
