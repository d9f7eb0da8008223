use serde::{Deserialize, Serialize};
use spin_sdk::http::{Request, Response};

use crate::auth::require_user;
use crate::config::*;
use crate::core::errors::ApiError;
use crate::core::helpers::{check_length, json, now, parse_body, round1, sanitize_text};
use crate::core::store::{KeyValue, StoreError};
use crate::models::ProgramRating;
use crate::router::AppContext;

const TRENDING_COUNT: usize = 3;

struct CatalogEntry {
    id: u64,
    name: &'static str,
    author: &'static str,
    kind: &'static str,
    description: &'static str,
    rating: f64,
    rating_count: u32,
    weeks: u32,
    workouts_per_week: u32,
    duration: &'static str,
    level: &'static str,
    equipment: &'static [&'static str],
    goals: &'static [&'static str],
    schedule: &'static [(&'static str, &'static str)],
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        id: 1,
        name: "12-Week Strength Builder",
        author: "Coach Mike",
        kind: "strength",
        description: "Complete strength program focused on compound movements to build overall strength and muscle.",
        rating: 4.5,
        rating_count: 432,
        weeks: 12,
        workouts_per_week: 4,
        duration: "60-75 min",
        level: "intermediate",
        equipment: &["Barbell", "Squat Rack", "Bench", "Dumbbells"],
        goals: &["Strength", "Muscle Gain"],
        schedule: &[
            ("Monday", "Squat & Accessories"),
            ("Tuesday", "Bench Press & Upper Push"),
            ("Thursday", "Deadlift & Posterior Chain"),
            ("Friday", "Overhead Press & Upper Pull"),
        ],
    },
    CatalogEntry {
        id: 2,
        name: "Endurance Challenge",
        author: "FitRunner",
        kind: "cardio",
        description: "Progressive cardio program designed to improve endurance and cardiovascular health.",
        rating: 4.0,
        rating_count: 289,
        weeks: 8,
        workouts_per_week: 5,
        duration: "30-60 min",
        level: "beginner",
        equipment: &["Running Shoes", "Heart Rate Monitor"],
        goals: &["Endurance", "Heart Health"],
        schedule: &[
            ("Monday", "Easy Run"),
            ("Tuesday", "Intervals"),
            ("Wednesday", "Recovery Jog"),
            ("Friday", "Tempo Run"),
            ("Sunday", "Long Run"),
        ],
    },
    CatalogEntry {
        id: 3,
        name: "Full Body Transformation",
        author: "Transform Fitness",
        kind: "mixed",
        description: "Comprehensive program combining strength training, cardio, and nutrition for total body transformation.",
        rating: 5.0,
        rating_count: 516,
        weeks: 16,
        workouts_per_week: 5,
        duration: "45-60 min",
        level: "intermediate",
        equipment: &["Dumbbells", "Kettlebell", "Jump Rope", "Pull-up Bar"],
        goals: &["Fat Loss", "Strength", "Conditioning"],
        schedule: &[
            ("Monday", "Full Body Strength"),
            ("Tuesday", "HIIT Conditioning"),
            ("Wednesday", "Upper Body Hypertrophy"),
            ("Friday", "Lower Body Hypertrophy"),
            ("Saturday", "Steady-State Cardio"),
        ],
    },
    CatalogEntry {
        id: 4,
        name: "Beginner's Guide to Lifting",
        author: "StartStrong",
        kind: "strength",
        description: "Perfect for beginners looking to learn proper form and build a foundation of strength.",
        rating: 4.7,
        rating_count: 352,
        weeks: 8,
        workouts_per_week: 3,
        duration: "45 min",
        level: "beginner",
        equipment: &["Barbell", "Dumbbells", "Bench"],
        goals: &["Technique", "Strength"],
        schedule: &[
            ("Monday", "Full Body A"),
            ("Wednesday", "Full Body B"),
            ("Friday", "Full Body A"),
        ],
    },
    CatalogEntry {
        id: 5,
        name: "HIIT Fat Burner",
        author: "BurnItUp",
        kind: "cardio",
        description: "High intensity interval training program focused on maximizing calorie burn and fat loss.",
        rating: 4.2,
        rating_count: 178,
        weeks: 6,
        workouts_per_week: 4,
        duration: "20-30 min",
        level: "intermediate",
        equipment: &["Bodyweight", "Jump Rope"],
        goals: &["Fat Loss", "Conditioning"],
        schedule: &[
            ("Monday", "Tabata Circuit"),
            ("Tuesday", "Sprint Intervals"),
            ("Thursday", "EMOM Circuit"),
            ("Saturday", "Metabolic Finisher"),
        ],
    },
    CatalogEntry {
        id: 6,
        name: "5x5 Progressive Overload",
        author: "GainTrain",
        kind: "strength",
        description: "Classic 5x5 workout structure with progressive overload for consistent strength gains.",
        rating: 4.8,
        rating_count: 403,
        weeks: 12,
        workouts_per_week: 3,
        duration: "45-60 min",
        level: "beginner",
        equipment: &["Barbell", "Squat Rack", "Bench"],
        goals: &["Strength"],
        schedule: &[
            ("Monday", "Workout A: Squat, Bench, Row"),
            ("Wednesday", "Workout B: Squat, Press, Deadlift"),
            ("Friday", "Workout A: Squat, Bench, Row"),
        ],
    },
];

#[derive(Serialize, Debug)]
pub struct ScheduleDay {
    pub day: &'static str,
    pub focus: &'static str,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub id: u64,
    pub name: &'static str,
    pub author: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub description: &'static str,
    pub rating: f64,
    pub rating_count: u32,
    pub weeks: u32,
    pub workouts_per_week: u32,
    pub duration: &'static str,
    pub level: &'static str,
    pub equipment: &'static [&'static str],
    pub goals: &'static [&'static str],
    pub schedule: Vec<ScheduleDay>,
}

#[derive(Deserialize)]
struct RateRequest {
    rating: Option<u8>,
    comment: Option<String>,
}

/// Folds stored user ratings into the catalog's base average.
pub fn blended_rating(base: f64, base_count: u32, ratings: &[ProgramRating]) -> (f64, u32) {
    if ratings.is_empty() {
        return (base, base_count);
    }
    let sum: f64 = ratings.iter().map(|r| f64::from(r.rating)).sum();
    let count = base_count + ratings.len() as u32;
    (round1((base * f64::from(base_count) + sum) / f64::from(count)), count)
}

pub fn program_ratings(store: &dyn KeyValue, program_id: u64) -> Result<Vec<ProgramRating>, StoreError> {
    Ok(store.get_json(&program_ratings_key(program_id))?.unwrap_or_default())
}

fn build_program(store: &dyn KeyValue, entry: &CatalogEntry) -> Result<Program, StoreError> {
    let (rating, rating_count) = blended_rating(entry.rating, entry.rating_count, &program_ratings(store, entry.id)?);
    Ok(Program {
        id: entry.id,
        name: entry.name,
        author: entry.author,
        kind: entry.kind,
        description: entry.description,
        rating,
        rating_count,
        weeks: entry.weeks,
        workouts_per_week: entry.workouts_per_week,
        duration: entry.duration,
        level: entry.level,
        equipment: entry.equipment,
        goals: entry.goals,
        schedule: entry
            .schedule
            .iter()
            .map(|&(day, focus)| ScheduleDay { day, focus })
            .collect(),
    })
}

pub fn all_programs(store: &dyn KeyValue) -> Result<Vec<Program>, StoreError> {
    CATALOG.iter().map(|e| build_program(store, e)).collect()
}

/// Highest rated first, more ratings winning a tie.
pub fn trending_programs(store: &dyn KeyValue) -> Result<Vec<Program>, StoreError> {
    let mut programs = all_programs(store)?;
    programs.sort_by(|a, b| {
        b.rating
            .total_cmp(&a.rating)
            .then(b.rating_count.cmp(&a.rating_count))
    });
    programs.truncate(TRENDING_COUNT);
    Ok(programs)
}

/// Stores `user_id`'s rating, replacing any earlier one.
pub fn rate_program(
    store: &dyn KeyValue,
    program_id: u64,
    user_id: u64,
    rating: u8,
    comment: Option<String>,
) -> Result<ProgramRating, StoreError> {
    let key = program_ratings_key(program_id);
    let mut ratings = program_ratings(store, program_id)?;
    ratings.retain(|r| r.user_id != user_id);

    let entry = ProgramRating {
        id: store.next_id("program_ratings")?,
        program_id,
        user_id,
        rating,
        comment,
        created_at: now(),
    };
    ratings.push(entry.clone());
    store.set_json(&key, &ratings)?;

    Ok(entry)
}

fn catalog_entry(program_id: u64) -> Result<&'static CatalogEntry, ApiError> {
    CATALOG
        .iter()
        .find(|e| e.id == program_id)
        .ok_or_else(|| ApiError::NotFound("Program not found".to_string()))
}

// === HTTP Handlers ===

pub fn list_programs(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    require_user(ctx, req)?;
    json(200, &all_programs(ctx.store)?)
}

pub fn list_trending(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    require_user(ctx, req)?;
    json(200, &trending_programs(ctx.store)?)
}

pub fn get_program(ctx: &AppContext, req: &Request, program_id: u64) -> Result<Response, ApiError> {
    require_user(ctx, req)?;
    let entry = catalog_entry(program_id)?;
    json(200, &build_program(ctx.store, entry)?)
}

pub fn create_rating(ctx: &AppContext, req: &Request, program_id: u64) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;
    catalog_entry(program_id)?;

    let body: RateRequest = parse_body(req)?;
    let rating = body
        .rating
        .filter(|r| (1..=5).contains(r))
        .ok_or_else(|| ApiError::BadRequest("Rating must be between 1 and 5".to_string()))?;
    if let Some(c) = body.comment.as_deref() {
        check_length(c.trim(), MAX_COMMENT_LENGTH, "Comment")?;
    }
    let comment = body
        .comment
        .map(|c| sanitize_text(c.trim()))
        .filter(|c| !c.is_empty());

    let saved = rate_program(ctx.store, program_id, user_id, rating, comment)?;
    tracing::info!(user_id, program_id, rating, "program rated");

    json(201, &saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryKv;

    #[test]
    fn catalog_is_served_with_base_ratings() {
        let kv = MemoryKv::new();
        let programs = all_programs(&kv).unwrap();

        assert_eq!(programs.len(), 6);
        assert_eq!(programs[0].name, "12-Week Strength Builder");
        assert_eq!(programs[0].rating, 4.5);
        assert_eq!(programs[0].rating_count, 432);
    }

    #[test]
    fn trending_is_top_three_by_rating() {
        let kv = MemoryKv::new();
        let ids: Vec<u64> = trending_programs(&kv).unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 6, 4]);
    }

    #[test]
    fn rerating_replaces_the_earlier_rating() {
        let kv = MemoryKv::new();
        let store: &dyn KeyValue = &kv;

        rate_program(store, 2, 7, 1, None).unwrap();
        rate_program(store, 2, 7, 5, Some("great".to_string())).unwrap();

        let ratings = program_ratings(store, 2).unwrap();
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings[0].rating, 5);
    }

    #[test]
    fn ratings_blend_into_the_base_average() {
        let kv = MemoryKv::new();
        let store: &dyn KeyValue = &kv;
        rate_program(store, 1, 1, 5, None).unwrap();

        let (rating, count) = blended_rating(4.0, 1, &program_ratings(store, 1).unwrap());
        assert_eq!((rating, count), (4.5, 2));
    }
}
