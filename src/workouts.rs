use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use spin_sdk::http::{Request, Response};

use crate::auth::require_user;
use crate::config::*;
use crate::core::errors::ApiError;
use crate::core::helpers::{check_length, json, message, now, parse_body, sanitize_text};
use crate::core::query_params::{get_string, parse_query_params};
use crate::core::store::{KeyValue, StoreError};
use crate::models::{Exercise, Workout, WorkoutSet};
use crate::posts;
use crate::router::AppContext;

#[derive(Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewSet {
    pub weight: Option<f64>,
    pub reps: Option<u32>,
    pub duration: Option<u32>,
    pub distance: Option<f64>,
    pub rpe: Option<u8>,
}

#[derive(Deserialize, Clone, Default)]
pub struct NewExercise {
    pub name: Option<String>,
    pub sets: Option<Vec<NewSet>>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CreateWorkoutRequest {
    name: Option<String>,
    exercises: Option<Vec<NewExercise>>,
    share_to_feed: Option<bool>,
    use_metric: Option<bool>,
    notes: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UpdateWorkoutRequest {
    name: Option<String>,
    notes: Option<String>,
    use_metric: Option<bool>,
    complete: Option<bool>,
}

/// A workout accepted for storage: every exercise named and every set in range.
pub struct NewWorkout {
    pub name: String,
    pub notes: Option<String>,
    pub use_metric: bool,
    pub exercises: Vec<(String, Vec<NewSet>)>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseDetail {
    #[serde(flatten)]
    pub exercise: Exercise,
    pub sets: Vec<WorkoutSet>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutDetail {
    #[serde(flatten)]
    pub workout: Workout,
    pub exercises: Vec<ExerciseDetail>,
}

impl WorkoutDetail {
    /// Σ weight × reps over every set that records both.
    pub fn volume(&self) -> f64 {
        self.exercises
            .iter()
            .flat_map(|e| e.sets.iter())
            .map(WorkoutSet::volume)
            .sum()
    }
}

/// List-row shape: the workout plus its derived duration, volume and
/// exercise names.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutView {
    #[serde(flatten)]
    pub workout: Workout,
    pub duration: String,
    pub volume: f64,
    pub exercise_count: usize,
    pub exercises: Vec<String>,
}

impl From<WorkoutDetail> for WorkoutView {
    fn from(detail: WorkoutDetail) -> Self {
        let volume = detail.volume().round();
        let duration = duration_label(detail.workout.start_time, detail.workout.end_time);
        WorkoutView {
            duration,
            volume,
            exercise_count: detail.exercises.len(),
            exercises: detail.exercises.into_iter().map(|e| e.exercise.name).collect(),
            workout: detail.workout,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkoutDetailView {
    #[serde(flatten)]
    detail: WorkoutDetail,
    duration: String,
    volume: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkoutTemplate {
    id: u64,
    name: &'static str,
    exercise_count: usize,
    created_by: &'static str,
    exercises: &'static [&'static str],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpcomingWorkout {
    id: u64,
    name: &'static str,
    scheduled_for: DateTime<Utc>,
    time: &'static str,
    duration: &'static str,
}

const TEMPLATES: &[(&str, &str, &[&str])] = &[
    ("Push Day", "You", &["Bench Press", "Shoulder Press", "Tricep Extensions", "Chest Flys", "Lateral Raises"]),
    ("Pull Day", "You", &["Pull Ups", "Barbell Rows", "Face Pulls", "Bicep Curls", "Lat Pulldowns"]),
    ("Leg Day", "You", &["Squats", "Deadlifts", "Leg Press", "Leg Extensions", "Leg Curls", "Calf Raises"]),
    ("Full Body", "Community", &["Squats", "Bench Press", "Deadlifts", "Pull Ups", "Shoulder Press", "Rows", "Lunges", "Planks"]),
    ("30 Min HIIT", "Community", &["Burpees", "Mountain Climbers", "Jumping Jacks", "High Knees", "Push Ups", "Planks"]),
];

// (name, days from today, time, duration)
const SCHEDULE: &[(&str, i64, &str, &str)] = &[
    ("Upper Body Strength", 0, "4:30 PM", "45-60 min"),
    ("HIIT Cardio", 1, "6:00 AM", "20-30 min"),
    ("Lower Body Focus", 2, "5:30 PM", "45-60 min"),
];

/// `"Nm"` under an hour, `"Hh Mm"` from an hour on, `"In progress"` while
/// the workout has no end time.
pub fn duration_label(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> String {
    let end = match end {
        Some(e) => e,
        None => return "In progress".to_string(),
    };

    let minutes = (end - start).num_minutes().max(0);
    if minutes < 60 {
        format!("{}m", minutes)
    } else {
        format!("{}h {}m", minutes / 60, minutes % 60)
    }
}

// === Validation ===

fn validate_set(set: &NewSet) -> Result<(), ApiError> {
    if set.weight.is_some_and(|w| !w.is_finite() || w < 0.0) {
        return Err(ApiError::BadRequest("Weight must be a non-negative number".to_string()));
    }
    if set.distance.is_some_and(|d| !d.is_finite() || d < 0.0) {
        return Err(ApiError::BadRequest("Distance must be a non-negative number".to_string()));
    }
    if set.rpe.is_some_and(|r| !(1..=10).contains(&r)) {
        return Err(ApiError::BadRequest("RPE must be between 1 and 10".to_string()));
    }
    Ok(())
}

pub fn validate_workout_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    check_length(name, MAX_WORKOUT_NAME_LENGTH, "Workout name")?;
    let name = sanitize_text(name);
    if name.is_empty() {
        return Err(ApiError::BadRequest("Workout name is required".to_string()));
    }
    Ok(name)
}

/// Checks the whole payload before anything is written. Exercises without a
/// name or a set list are dropped.
fn validate_new_workout(body: CreateWorkoutRequest) -> Result<(NewWorkout, bool), ApiError> {
    let (name, exercises) = match (body.name, body.exercises) {
        (Some(name), Some(exercises)) => (name, exercises),
        _ => return Err(ApiError::BadRequest("Invalid workout data".to_string())),
    };
    let name = validate_workout_name(&name)?;

    let mut accepted = Vec::new();
    for exercise in exercises {
        let (ex_name, sets) = match (exercise.name, exercise.sets) {
            (Some(n), Some(s)) if !n.trim().is_empty() => (n, s),
            _ => continue,
        };
        for set in &sets {
            validate_set(set)?;
        }
        accepted.push((sanitize_text(ex_name.trim()), sets));
    }

    let workout = NewWorkout {
        name,
        notes: body.notes.map(|n| sanitize_text(&n)).filter(|n| !n.is_empty()),
        use_metric: body.use_metric.unwrap_or(true),
        exercises: accepted,
    };
    Ok((workout, body.share_to_feed.unwrap_or(false)))
}

// === Storage ===

pub fn load_workout(store: &dyn KeyValue, id: u64) -> Result<Option<Workout>, StoreError> {
    store.get_json(&workout_key(id))
}

/// All workouts of `user_id`, newest start first.
pub fn user_workouts(store: &dyn KeyValue, user_id: u64) -> Result<Vec<Workout>, StoreError> {
    let ids = store.get_ids(&user_workouts_key(user_id))?;
    let mut workouts = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(w) = load_workout(store, id)? {
            workouts.push(w);
        }
    }
    workouts.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));
    Ok(workouts)
}

pub fn workout_detail(store: &dyn KeyValue, workout: Workout) -> Result<WorkoutDetail, StoreError> {
    let mut exercises = Vec::new();
    for exercise_id in store.get_ids(&workout_exercises_key(workout.id))? {
        let exercise: Exercise = match store.get_json(&exercise_key(exercise_id))? {
            Some(e) => e,
            None => continue,
        };

        let mut sets = Vec::new();
        for set_id in store.get_ids(&exercise_sets_key(exercise_id))? {
            if let Some(set) = store.get_json::<WorkoutSet>(&set_key(set_id))? {
                sets.push(set);
            }
        }
        exercises.push(ExerciseDetail { exercise, sets });
    }

    Ok(WorkoutDetail { workout, exercises })
}

pub fn user_workout_details(store: &dyn KeyValue, user_id: u64) -> Result<Vec<WorkoutDetail>, StoreError> {
    user_workouts(store, user_id)?
        .into_iter()
        .map(|w| workout_detail(store, w))
        .collect()
}

fn append_id(store: &dyn KeyValue, key: &str, id: u64) -> Result<(), StoreError> {
    let mut ids = store.get_ids(key)?;
    ids.push(id);
    store.set_json(key, &ids)
}

fn write_workout(store: &dyn KeyValue, workout: &Workout, exercises: &[(String, Vec<NewSet>)]) -> Result<(), StoreError> {
    store.set_json(&workout_key(workout.id), workout)?;
    append_id(store, &user_workouts_key(workout.user_id), workout.id)?;

    for (name, sets) in exercises {
        let exercise = Exercise {
            id: store.next_id("exercises")?,
            workout_id: workout.id,
            name: name.clone(),
            created_at: workout.created_at,
        };
        store.set_json(&exercise_key(exercise.id), &exercise)?;
        append_id(store, &workout_exercises_key(workout.id), exercise.id)?;

        for new_set in sets {
            let set = WorkoutSet {
                id: store.next_id("sets")?,
                exercise_id: exercise.id,
                weight: new_set.weight,
                reps: new_set.reps,
                duration: new_set.duration,
                distance: new_set.distance,
                rpe: new_set.rpe,
                created_at: workout.created_at,
            };
            store.set_json(&set_key(set.id), &set)?;
            append_id(store, &exercise_sets_key(exercise.id), set.id)?;
        }
    }
    Ok(())
}

/// Stores a workout with its exercises and sets. A failed write removes
/// whatever part was already stored.
pub fn save_new_workout(store: &dyn KeyValue, user_id: u64, new_workout: &NewWorkout) -> Result<Workout, StoreError> {
    let created = now();
    let workout = Workout {
        id: store.next_id("workouts")?,
        user_id,
        name: new_workout.name.clone(),
        start_time: created,
        end_time: None,
        notes: new_workout.notes.clone(),
        use_metric: new_workout.use_metric,
        created_at: created,
    };

    if let Err(e) = write_workout(store, &workout, &new_workout.exercises) {
        tracing::warn!(workout_id = workout.id, error = %e, "workout write failed, cleaning up");
        if let Err(cleanup) = remove_workout(store, &workout) {
            tracing::error!(workout_id = workout.id, error = %cleanup, "workout cleanup failed");
        }
        return Err(e);
    }

    Ok(workout)
}

pub fn save_workout(store: &dyn KeyValue, workout: &Workout) -> Result<(), StoreError> {
    store.set_json(&workout_key(workout.id), workout)
}

/// Deletes a workout together with its exercises and sets.
pub fn remove_workout(store: &dyn KeyValue, workout: &Workout) -> Result<(), StoreError> {
    let exercises_key = workout_exercises_key(workout.id);
    for exercise_id in store.get_ids(&exercises_key)? {
        let sets_key = exercise_sets_key(exercise_id);
        for set_id in store.get_ids(&sets_key)? {
            store.delete(&set_key(set_id))?;
        }
        store.delete(&sets_key)?;
        store.delete(&exercise_key(exercise_id))?;
    }
    store.delete(&exercises_key)?;

    let list_key = user_workouts_key(workout.user_id);
    let mut ids = store.get_ids(&list_key)?;
    ids.retain(|id| *id != workout.id);
    store.set_json(&list_key, &ids)?;

    store.delete(&workout_key(workout.id))
}

fn parse_day(raw: &str) -> Result<NaiveDate, ApiError> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc).date_naive())
        .map_err(|_| ApiError::BadRequest(format!("Invalid date: {}", raw)))
}

fn owned_workout(ctx: &AppContext, user_id: u64, workout_id: u64) -> Result<Workout, ApiError> {
    let workout = load_workout(ctx.store, workout_id)?
        .ok_or_else(|| ApiError::NotFound("Workout not found".to_string()))?;
    if workout.user_id != user_id {
        return Err(ApiError::Forbidden("Not authorized to modify this workout".to_string()));
    }
    Ok(workout)
}

// === HTTP Handlers ===

pub fn list_workouts(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;

    let params = parse_query_params(req.uri());
    let filter = get_string(&params, "filter", Some("all"))
        .unwrap_or_default()
        .to_lowercase();
    let day = match get_string(&params, "date", None) {
        Some(raw) => Some(parse_day(&raw)?),
        None => None,
    };

    let mut views = Vec::new();
    for workout in user_workouts(ctx.store, user_id)? {
        if filter != "all" && !workout.name.to_lowercase().contains(&filter) {
            continue;
        }
        if day.is_some_and(|d| workout.start_time.date_naive() != d) {
            continue;
        }
        views.push(WorkoutView::from(workout_detail(ctx.store, workout)?));
    }

    json(200, &views)
}

pub fn create_workout(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;
    let body: CreateWorkoutRequest = parse_body(req)?;
    let (new_workout, share_to_feed) = validate_new_workout(body)?;

    let workout = save_new_workout(ctx.store, user_id, &new_workout)?;
    tracing::info!(
        user_id,
        workout_id = workout.id,
        exercises = new_workout.exercises.len(),
        "workout created"
    );

    if share_to_feed {
        let content = format!("Completed a {} workout", workout.name);
        posts::insert_post(ctx.store, user_id, Some(workout.id), &content, None)?;
    }

    json(201, &workout)
}

pub fn get_workout(ctx: &AppContext, req: &Request, workout_id: u64) -> Result<Response, ApiError> {
    require_user(ctx, req)?;

    let workout = load_workout(ctx.store, workout_id)?
        .ok_or_else(|| ApiError::NotFound("Workout not found".to_string()))?;
    let detail = workout_detail(ctx.store, workout)?;

    json(
        200,
        &WorkoutDetailView {
            duration: duration_label(detail.workout.start_time, detail.workout.end_time),
            volume: detail.volume().round(),
            detail,
        },
    )
}

pub fn update_workout(ctx: &AppContext, req: &Request, workout_id: u64) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;
    let mut workout = owned_workout(ctx, user_id, workout_id)?;
    let body: UpdateWorkoutRequest = parse_body(req)?;

    if let Some(name) = body.name.as_deref() {
        workout.name = validate_workout_name(name)?;
    }
    if let Some(notes) = body.notes.as_deref() {
        let notes = sanitize_text(notes);
        workout.notes = if notes.is_empty() { None } else { Some(notes) };
    }
    if let Some(use_metric) = body.use_metric {
        workout.use_metric = use_metric;
    }
    if body.complete == Some(true) && workout.end_time.is_none() {
        workout.end_time = Some(now());
    }

    save_workout(ctx.store, &workout)?;
    json(200, &workout)
}

pub fn delete_workout(ctx: &AppContext, req: &Request, workout_id: u64) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;
    let workout = owned_workout(ctx, user_id, workout_id)?;

    remove_workout(ctx.store, &workout)?;
    tracing::info!(user_id, workout_id, "workout deleted");

    message(200, "Workout deleted successfully")
}

pub fn list_templates(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    require_user(ctx, req)?;

    let templates: Vec<WorkoutTemplate> = TEMPLATES
        .iter()
        .enumerate()
        .map(|(i, &(name, created_by, exercises))| WorkoutTemplate {
            id: i as u64 + 1,
            name,
            exercise_count: exercises.len(),
            created_by,
            exercises,
        })
        .collect();

    json(200, &templates)
}

pub fn list_upcoming(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    require_user(ctx, req)?;

    let today = now();
    let upcoming: Vec<UpcomingWorkout> = SCHEDULE
        .iter()
        .enumerate()
        .map(|(i, &(name, offset, time, duration))| UpcomingWorkout {
            id: i as u64 + 1,
            name,
            scheduled_for: today + Duration::days(offset),
            time,
            duration,
        })
        .collect();

    json(200, &upcoming)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryKv;
    use chrono::TimeZone;

    fn bench_press() -> NewWorkout {
        NewWorkout {
            name: "Upper Body".to_string(),
            notes: None,
            use_metric: true,
            exercises: vec![
                (
                    "Bench Press".to_string(),
                    vec![
                        NewSet { weight: Some(80.0), reps: Some(10), ..Default::default() },
                        NewSet { weight: Some(85.0), reps: Some(8), ..Default::default() },
                    ],
                ),
                (
                    "Pull Ups".to_string(),
                    vec![NewSet { reps: Some(8), ..Default::default() }],
                ),
            ],
        }
    }

    #[test]
    fn duration_labels() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(duration_label(start, None), "In progress");
        assert_eq!(duration_label(start, Some(start + Duration::minutes(45))), "45m");
        assert_eq!(duration_label(start, Some(start + Duration::minutes(83))), "1h 23m");
        assert_eq!(duration_label(start, Some(start + Duration::minutes(120))), "2h 0m");
    }

    #[test]
    fn volume_sums_weighted_sets_only() {
        let kv = MemoryKv::new();
        let store: &dyn KeyValue = &kv;

        let workout = save_new_workout(store, 1, &bench_press()).unwrap();
        let detail = workout_detail(store, workout).unwrap();

        assert_eq!(detail.exercises.len(), 2);
        assert_eq!(detail.volume(), 80.0 * 10.0 + 85.0 * 8.0);

        let view = WorkoutView::from(detail);
        assert_eq!(view.exercise_count, 2);
        assert_eq!(view.exercises, vec!["Bench Press", "Pull Ups"]);
        assert_eq!(view.duration, "In progress");
    }

    #[test]
    fn remove_workout_cascades() {
        let kv = MemoryKv::new();
        let store: &dyn KeyValue = &kv;

        let workout = save_new_workout(store, 1, &bench_press()).unwrap();
        remove_workout(store, &workout).unwrap();

        assert!(load_workout(store, workout.id).unwrap().is_none());
        assert!(user_workouts(store, 1).unwrap().is_empty());
        for id in 1..=3 {
            assert!(!store.exists(&set_key(id)).unwrap());
        }
        assert!(!store.exists(&exercise_key(1)).unwrap());
    }

    #[test]
    fn payload_validation_skips_incomplete_exercises() {
        let body = CreateWorkoutRequest {
            name: Some("Legs".to_string()),
            exercises: Some(vec![
                NewExercise { name: Some("Squat".to_string()), sets: Some(vec![NewSet::default()]) },
                NewExercise { name: None, sets: Some(vec![]) },
                NewExercise { name: Some("Lunge".to_string()), sets: None },
            ]),
            ..Default::default()
        };
        let (workout, share) = validate_new_workout(body).unwrap();
        assert_eq!(workout.exercises.len(), 1);
        assert!(!share);
        assert!(workout.use_metric);

        let missing = CreateWorkoutRequest { name: Some("Legs".to_string()), ..Default::default() };
        assert!(matches!(validate_new_workout(missing), Err(ApiError::BadRequest(_))));

        let bad_rpe = CreateWorkoutRequest {
            name: Some("Legs".to_string()),
            exercises: Some(vec![NewExercise {
                name: Some("Squat".to_string()),
                sets: Some(vec![NewSet { rpe: Some(11), ..Default::default() }]),
            }]),
            ..Default::default()
        };
        assert!(matches!(validate_new_workout(bad_rpe), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn dates_accept_plain_days_and_timestamps() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(parse_day("2024-03-01").unwrap(), day);
        assert_eq!(parse_day("2024-03-01T23:10:00Z").unwrap(), day);
        assert!(parse_day("yesterday").is_err());
    }
}
