use std::env;

pub const SESSION_COOKIE: &str = "connect.sid";

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 50;
pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_BIO_LENGTH: usize = 500;
pub const MAX_POST_LENGTH: usize = 5000;
pub const MAX_COMMENT_LENGTH: usize = 1000;
pub const MAX_WORKOUT_NAME_LENGTH: usize = 100;
pub const POSTS_PER_PAGE: usize = 20;
pub const DEFAULT_WEEKLY_GOAL: u32 = 4;

pub const USERS_LIST_KEY: &str = "users_list";
pub const POSTS_LIST_KEY: &str = "posts_list";

pub fn user_key(id: u64) -> String {
    format!("user:{}", id)
}

pub fn workout_key(id: u64) -> String {
    format!("workout:{}", id)
}

pub fn user_workouts_key(user_id: u64) -> String {
    format!("user_workouts:{}", user_id)
}

pub fn exercise_key(id: u64) -> String {
    format!("exercise:{}", id)
}

pub fn workout_exercises_key(workout_id: u64) -> String {
    format!("workout_exercises:{}", workout_id)
}

pub fn set_key(id: u64) -> String {
    format!("set:{}", id)
}

pub fn exercise_sets_key(exercise_id: u64) -> String {
    format!("exercise_sets:{}", exercise_id)
}

pub fn post_key(id: u64) -> String {
    format!("post:{}", id)
}

pub fn comment_key(id: u64) -> String {
    format!("comment:{}", id)
}

pub fn post_comments_key(post_id: u64) -> String {
    format!("post_comments:{}", post_id)
}

pub fn likes_key(post_id: u64) -> String {
    format!("likes:{}", post_id)
}

pub fn followings_key(user_id: u64) -> String {
    format!("followings:{}", user_id)
}

pub fn followers_key(user_id: u64) -> String {
    format!("followers:{}", user_id)
}

pub fn program_ratings_key(program_id: u64) -> String {
    format!("program_ratings:{}", program_id)
}

pub fn session_key(token: &str) -> String {
    format!("session:{}", token)
}

pub fn user_sessions_key(user_id: u64) -> String {
    format!("user_sessions:{}", user_id)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub session_ttl_hours: i64,
    pub seed_demo_data: bool,
    pub cookie_secure: bool,
    pub bind_addr: String,
    pub ai: AiConfig,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            session_ttl_hours: 24,
            seed_demo_data: true,
            cookie_secure: false,
            bind_addr: "0.0.0.0:3000".to_string(),
            ai: AiConfig::default(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        AiConfig {
            api_key: None,
            api_url: "https://integrate.api.nvidia.com/v1/chat/completions".to_string(),
            model: "meta/llama-3.1-8b-instruct".to_string(),
            max_tokens: 500,
        }
    }
}

impl Config {
    /// Reads settings from the environment, keeping defaults for anything
    /// unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            session_ttl_hours: parse_var("FITSOCIAL_SESSION_TTL_HOURS")
                .unwrap_or(defaults.session_ttl_hours),
            seed_demo_data: parse_flag("FITSOCIAL_SEED_DEMO").unwrap_or(defaults.seed_demo_data),
            cookie_secure: parse_flag("FITSOCIAL_COOKIE_SECURE").unwrap_or(defaults.cookie_secure),
            bind_addr: env::var("FITSOCIAL_BIND").unwrap_or(defaults.bind_addr),
            ai: AiConfig {
                api_key: env::var("AI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
                api_url: env::var("AI_API_URL").unwrap_or(defaults.ai.api_url),
                model: env::var("AI_MODEL").unwrap_or(defaults.ai.model),
                max_tokens: parse_var("AI_MAX_TOKENS").unwrap_or(defaults.ai.max_tokens),
            },
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn parse_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
