use crate::comments;
use crate::config::USERS_LIST_KEY;
use crate::core::helpers::hash_password;
use crate::core::store::KeyValue;
use crate::follow;
use crate::posts;
use crate::users::{self, NewUser};
use crate::workouts::{self, NewSet, NewWorkout};

const DEMO_PASSWORD: &str = "password123";

/// Seeds two demo accounts with a workout, a post, a comment and a like.
/// Does nothing once any user exists. Returns whether data was written.
pub fn init_demo_data(store: &dyn KeyValue) -> anyhow::Result<bool> {
    if !store.get_ids(USERS_LIST_KEY)?.is_empty() {
        return Ok(false);
    }

    let john = users::insert_user(
        store,
        NewUser {
            username: "johndoe".to_string(),
            email: "john@example.com".to_string(),
            password_hash: hash_password(DEMO_PASSWORD)?,
            avatar: None,
            bio: Some("Fitness enthusiast and software developer".to_string()),
            weekly_goal: Some(4),
            use_metric: Some(true),
        },
    )?;
    let jane = users::insert_user(
        store,
        NewUser {
            username: "janedoe".to_string(),
            email: "jane@example.com".to_string(),
            password_hash: hash_password(DEMO_PASSWORD)?,
            avatar: None,
            bio: Some("Runner and yoga instructor".to_string()),
            weekly_goal: Some(5),
            use_metric: Some(true),
        },
    )?;

    follow::follow_user(store, john.id, jane.id)?;
    follow::follow_user(store, jane.id, john.id)?;

    let workout = workouts::save_new_workout(
        store,
        john.id,
        &NewWorkout {
            name: "Upper Body Workout".to_string(),
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
                ("Pull Ups".to_string(), vec![NewSet { reps: Some(8), ..Default::default() }]),
            ],
        },
    )?;

    let post = posts::insert_post(
        store,
        john.id,
        Some(workout.id),
        "Just finished a great upper body workout. Hit a new PR on bench press!",
        None,
    )?;
    comments::insert_comment(store, post.id, jane.id, None, "Great job! What's your new PR?")?;
    posts::like_post(store, jane.id, post.id)?;

    tracing::info!(users = 2, "demo data seeded");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryKv;

    #[test]
    fn seeds_once() {
        let kv = MemoryKv::new();
        let store: &dyn KeyValue = &kv;

        assert!(init_demo_data(store).unwrap());
        assert!(!init_demo_data(store).unwrap());

        assert_eq!(users::all_users(store).unwrap().len(), 2);
        let feed = posts::feed_posts(store, 2, None).unwrap();
        assert_eq!(feed.len(), 1);
        assert!(feed[0].liked);
        assert_eq!(feed[0].comment_count, 1);
        assert_eq!(feed[0].workout.as_ref().map(|w| w.volume), Some(1480.0));
    }
}
