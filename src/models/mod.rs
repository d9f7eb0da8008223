mod social;
mod user;
mod workout;

pub use social::{Comment, Follow, Like, Post, ProgramRating};
pub use user::{PublicUser, SessionData, User, UserSummary};
pub use workout::{Exercise, Workout, WorkoutSet};
