use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use spin_sdk::http::{Request, Response};

use crate::auth::require_user;
use crate::config::DEFAULT_WEEKLY_GOAL;
use crate::core::errors::ApiError;
use crate::core::helpers::{json, now, round1};
use crate::follow;
use crate::models::Workout;
use crate::router::AppContext;
use crate::users;
use crate::workouts::{self, WorkoutDetail};

const FREQUENCY_DAYS: i64 = 30;
const VOLUME_WORKOUTS: usize = 10;
const ACTIVITY_MONTHS: i32 = 12;
const PROGRESS_MONTHS: usize = 4;

#[derive(Serialize, Debug, PartialEq)]
pub struct DateCount {
    pub date: String,
    pub count: usize,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct VolumePoint {
    pub date: String,
    pub volume: f64,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct WeightPoint {
    pub date: String,
    pub weight: f64,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseProgress {
    pub id: u64,
    pub name: String,
    pub progress: Vec<WeightPoint>,
    pub current_max: f64,
    pub change: f64,
    pub unit: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkoutMetrics {
    total_workouts: usize,
    current_streak: u32,
    monthly_average: f64,
    frequency: Vec<DateCount>,
    volume: Vec<VolumePoint>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkoutStats {
    total_workouts: usize,
    weekly_workouts: usize,
    following: usize,
    followers: usize,
    current_streak: u32,
    weekly_goal: u32,
    monthly_average: f64,
    frequency: Vec<DateCount>,
    volume: Vec<VolumePoint>,
}

/// Workouts started since Sunday 00:00 (UTC) of the current week.
pub fn weekly_count(workouts: &[Workout], now: DateTime<Utc>) -> usize {
    let today = now.date_naive();
    let week_start = today - Duration::days(i64::from(today.weekday().num_days_from_sunday()));
    workouts
        .iter()
        .filter(|w| w.start_time.date_naive() >= week_start && w.start_time <= now)
        .count()
}

/// Workouts per calendar month since the first one, one decimal. Within the
/// first month this is simply the count.
pub fn monthly_average(workouts: &[Workout], now: DateTime<Utc>) -> f64 {
    let first = match workouts.iter().map(|w| w.start_time).min() {
        Some(f) => f,
        None => return 0.0,
    };

    let months = (now.year() - first.year()) * 12 + (now.month() as i32 - first.month() as i32);
    if months < 1 {
        return workouts.len() as f64;
    }
    round1(workouts.len() as f64 / f64::from(months))
}

/// Consecutive days with at least one workout, ending today or yesterday.
pub fn current_streak(workouts: &[Workout], today: NaiveDate) -> u32 {
    let days: BTreeSet<NaiveDate> = workouts.iter().map(|w| w.start_time.date_naive()).collect();

    let mut day = if days.contains(&today) {
        today
    } else {
        match today.pred_opt() {
            Some(yesterday) if days.contains(&yesterday) => yesterday,
            _ => return 0,
        }
    };

    let mut streak = 0;
    while days.contains(&day) {
        streak += 1;
        day = match day.pred_opt() {
            Some(d) => d,
            None => break,
        };
    }
    streak
}

/// One bucket per day for the last 30 days, oldest first, labelled "Mar 5".
pub fn frequency_30d(workouts: &[Workout], today: NaiveDate) -> Vec<DateCount> {
    (0..FREQUENCY_DAYS)
        .rev()
        .map(|back| {
            let day = today - Duration::days(back);
            DateCount {
                date: day.format("%b %-d").to_string(),
                count: workouts.iter().filter(|w| w.start_time.date_naive() == day).count(),
            }
        })
        .collect()
}

/// Rounded volume of the ten most recent workouts, oldest first.
pub fn volume_series(details: &[WorkoutDetail]) -> Vec<VolumePoint> {
    let mut ordered: Vec<&WorkoutDetail> = details.iter().collect();
    ordered.sort_by_key(|d| (d.workout.start_time, d.workout.id));

    let skip = ordered.len().saturating_sub(VOLUME_WORKOUTS);
    ordered
        .into_iter()
        .skip(skip)
        .map(|d| VolumePoint {
            date: d.workout.start_time.format("%b %-d").to_string(),
            volume: d.volume().round(),
        })
        .collect()
}

fn month_back(now: DateTime<Utc>, back: i32) -> (i32, u32) {
    let index = now.year() * 12 + now.month0() as i32 - back;
    (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}

fn month_label(year: i32, month: u32, pattern: &str) -> String {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|d| d.format(pattern).to_string())
        .unwrap_or_default()
}

/// Workout count for each of the last 12 months, labelled "Mar 2024".
pub fn monthly_activity(workouts: &[Workout], now: DateTime<Utc>) -> Vec<DateCount> {
    (0..ACTIVITY_MONTHS)
        .rev()
        .map(|back| {
            let (year, month) = month_back(now, back);
            DateCount {
                date: month_label(year, month, "%b %Y"),
                count: workouts
                    .iter()
                    .filter(|w| w.start_time.year() == year && w.start_time.month() == month)
                    .count(),
            }
        })
        .collect()
}

/// Heaviest set per exercise name and month, over the last four months that
/// have data. Exercises with no weighted sets are left out.
pub fn exercise_progress(details: &[WorkoutDetail], use_metric: bool) -> Vec<ExerciseProgress> {
    // name -> (year, month) -> max weight
    let mut by_name: BTreeMap<String, BTreeMap<(i32, u32), f64>> = BTreeMap::new();

    for detail in details {
        let started = detail.workout.start_time;
        let month = (started.year(), started.month());
        for exercise in &detail.exercises {
            let heaviest = exercise
                .sets
                .iter()
                .filter_map(|s| s.weight)
                .fold(None, |max: Option<f64>, w| Some(max.map_or(w, |m| m.max(w))));

            if let Some(weight) = heaviest {
                let slot = by_name
                    .entry(exercise.exercise.name.clone())
                    .or_default()
                    .entry(month)
                    .or_insert(weight);
                *slot = slot.max(weight);
            }
        }
    }

    let unit = if use_metric { "kg" } else { "lbs" };
    by_name
        .into_iter()
        .enumerate()
        .map(|(i, (name, months))| {
            let skip = months.len().saturating_sub(PROGRESS_MONTHS);
            let progress: Vec<WeightPoint> = months
                .into_iter()
                .skip(skip)
                .map(|((year, month), weight)| WeightPoint {
                    date: month_label(year, month, "%b"),
                    weight,
                })
                .collect();

            let first = progress.first().map_or(0.0, |p| p.weight);
            let current_max = progress.last().map_or(0.0, |p| p.weight);
            ExerciseProgress {
                id: i as u64 + 1,
                name,
                current_max,
                change: round1(current_max - first),
                progress,
                unit,
            }
        })
        .collect()
}

// === HTTP Handlers ===

pub fn workout_stats(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;
    let now = now();

    let details = workouts::user_workout_details(ctx.store, user_id)?;
    let list: Vec<Workout> = details.iter().map(|d| d.workout.clone()).collect();
    let weekly_goal = users::load_user(ctx.store, user_id)?
        .map(|u| u.weekly_goal)
        .unwrap_or(DEFAULT_WEEKLY_GOAL);

    json(
        200,
        &WorkoutStats {
            total_workouts: list.len(),
            weekly_workouts: weekly_count(&list, now),
            following: follow::get_followings(ctx.store, user_id)?.len(),
            followers: follow::get_followers(ctx.store, user_id)?.len(),
            current_streak: current_streak(&list, now.date_naive()),
            weekly_goal,
            monthly_average: monthly_average(&list, now),
            frequency: frequency_30d(&list, now.date_naive()),
            volume: volume_series(&details),
        },
    )
}

pub fn workout_metrics(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;
    let now = now();

    let details = workouts::user_workout_details(ctx.store, user_id)?;
    let list: Vec<Workout> = details.iter().map(|d| d.workout.clone()).collect();

    json(
        200,
        &WorkoutMetrics {
            total_workouts: list.len(),
            current_streak: current_streak(&list, now.date_naive()),
            monthly_average: monthly_average(&list, now),
            frequency: frequency_30d(&list, now.date_naive()),
            volume: volume_series(&details),
        },
    )
}

pub fn exercise_metrics(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;

    let use_metric = users::load_user(ctx.store, user_id)?
        .map(|u| u.use_metric)
        .unwrap_or(true);
    let details = workouts::user_workout_details(ctx.store, user_id)?;

    json(200, &exercise_progress(&details, use_metric))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Exercise, WorkoutSet};
    use crate::workouts::ExerciseDetail;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn workout(id: u64, start: DateTime<Utc>) -> Workout {
        Workout {
            id,
            user_id: 1,
            name: format!("Workout {}", id),
            start_time: start,
            end_time: None,
            notes: None,
            use_metric: true,
            created_at: start,
        }
    }

    fn detail(id: u64, start: DateTime<Utc>, exercise: &str, weights: &[(f64, u32)]) -> WorkoutDetail {
        let sets = weights
            .iter()
            .enumerate()
            .map(|(i, (weight, reps))| WorkoutSet {
                id: id * 100 + i as u64,
                exercise_id: id,
                weight: Some(*weight),
                reps: Some(*reps),
                duration: None,
                distance: None,
                rpe: None,
                created_at: start,
            })
            .collect();
        WorkoutDetail {
            workout: workout(id, start),
            exercises: vec![ExerciseDetail {
                exercise: Exercise {
                    id,
                    workout_id: id,
                    name: exercise.to_string(),
                    created_at: start,
                },
                sets,
            }],
        }
    }

    #[test]
    fn streak_ends_today_or_yesterday() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let run = vec![workout(1, at(2024, 3, 10)), workout(2, at(2024, 3, 9)), workout(3, at(2024, 3, 8))];
        assert_eq!(current_streak(&run, today), 3);

        let from_yesterday = vec![workout(1, at(2024, 3, 9)), workout(2, at(2024, 3, 8))];
        assert_eq!(current_streak(&from_yesterday, today), 2);

        let stale = vec![workout(1, at(2024, 3, 7))];
        assert_eq!(current_streak(&stale, today), 0);
        assert_eq!(current_streak(&[], today), 0);
    }

    #[test]
    fn streak_stops_at_a_gap_and_ignores_duplicate_days() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let list = vec![
            workout(1, at(2024, 3, 10)),
            workout(2, at(2024, 3, 10)),
            workout(3, at(2024, 3, 9)),
            workout(4, at(2024, 3, 7)),
        ];
        assert_eq!(current_streak(&list, today), 2);
    }

    #[test]
    fn weekly_count_starts_on_sunday() {
        // 2024-03-13 is a Wednesday; the week began Sunday 2024-03-10
        let now = at(2024, 3, 13);
        let list = vec![
            workout(1, at(2024, 3, 9)),
            workout(2, Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()),
            workout(3, at(2024, 3, 12)),
        ];
        assert_eq!(weekly_count(&list, now), 2);
    }

    #[test]
    fn monthly_average_uses_month_difference() {
        let now = at(2024, 4, 15);
        assert_eq!(monthly_average(&[], now), 0.0);

        let same_month = vec![workout(1, at(2024, 4, 1)), workout(2, at(2024, 4, 2))];
        assert_eq!(monthly_average(&same_month, now), 2.0);

        let spread = vec![
            workout(1, at(2024, 1, 20)),
            workout(2, at(2024, 2, 2)),
            workout(3, at(2024, 3, 2)),
            workout(4, at(2024, 4, 2)),
        ];
        // 4 workouts over 3 months
        assert_eq!(monthly_average(&spread, now), 1.3);
    }

    #[test]
    fn frequency_has_thirty_days_oldest_first() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let list = vec![workout(1, at(2024, 3, 10)), workout(2, at(2024, 3, 10)), workout(3, at(2024, 2, 10))];
        let buckets = frequency_30d(&list, today);

        assert_eq!(buckets.len(), 30);
        assert_eq!(buckets[0].date, "Feb 10");
        assert_eq!(buckets[0].count, 1);
        assert_eq!(buckets[29], DateCount { date: "Mar 10".to_string(), count: 2 });
    }

    #[test]
    fn activity_spans_twelve_months_across_years() {
        let now = at(2024, 2, 15);
        let list = vec![workout(1, at(2024, 2, 1)), workout(2, at(2023, 3, 31)), workout(3, at(2023, 2, 28))];
        let months = monthly_activity(&list, now);

        assert_eq!(months.len(), 12);
        assert_eq!(months[0], DateCount { date: "Mar 2023".to_string(), count: 1 });
        assert_eq!(months[11], DateCount { date: "Feb 2024".to_string(), count: 1 });
        assert_eq!(months.iter().map(|m| m.count).sum::<usize>(), 2);
    }

    #[test]
    fn volume_series_keeps_last_ten_oldest_first() {
        let details: Vec<WorkoutDetail> = (1..=12)
            .map(|i| detail(i, at(2024, 1, i as u32), "Squat", &[(100.0, i as u32)]))
            .collect();
        let series = volume_series(&details);

        assert_eq!(series.len(), 10);
        assert_eq!(series[0], VolumePoint { date: "Jan 3".to_string(), volume: 300.0 });
        assert_eq!(series[9].volume, 1200.0);
    }

    #[test]
    fn exercise_progress_tracks_monthly_max() {
        let details = vec![
            detail(1, at(2024, 1, 5), "Bench Press", &[(80.0, 10), (82.5, 5)]),
            detail(2, at(2024, 1, 20), "Bench Press", &[(85.0, 3)]),
            detail(3, at(2024, 2, 5), "Bench Press", &[(87.5, 3)]),
            detail(4, at(2024, 3, 5), "Squat", &[(100.0, 5)]),
        ];
        let progress = exercise_progress(&details, false);

        assert_eq!(progress.len(), 2);
        let bench = &progress[0];
        assert_eq!(bench.name, "Bench Press");
        assert_eq!(
            bench.progress,
            vec![
                WeightPoint { date: "Jan".to_string(), weight: 85.0 },
                WeightPoint { date: "Feb".to_string(), weight: 87.5 },
            ]
        );
        assert_eq!(bench.current_max, 87.5);
        assert_eq!(bench.change, 2.5);
        assert_eq!(bench.unit, "lbs");
        assert_eq!(progress[1].change, 0.0);
    }
}
