pub mod analysis;
pub mod auth;
pub mod comments;
pub mod config;
pub mod core;
pub mod follow;
pub mod leaderboard;
pub mod logging;
pub mod models;
pub mod posts;
pub mod programs;
pub mod router;
pub mod stats;
pub mod users;
pub mod workouts;

#[cfg(target_arch = "wasm32")]
mod component {
    use spin_sdk::http::{IntoResponse, Request};
    use spin_sdk::http_component;

    use crate::analysis::ChatCompletionsClient;
    use crate::config::Config;
    use crate::core::db::init_demo_data;
    use crate::core::store::SpinKv;
    use crate::router::{self, AppContext};

    #[http_component]
    async fn handle(req: Request) -> anyhow::Result<impl IntoResponse> {
        crate::logging::init();

        let config = Config::from_env();
        let store = SpinKv::open_default()?;
        if config.seed_demo_data {
            if let Err(e) = init_demo_data(&store) {
                tracing::error!(error = %e, "demo data seeding failed");
            }
        }

        let ai = ChatCompletionsClient::new(config.ai.clone());
        let ctx = AppContext {
            store: &store,
            config: &config,
            ai: &ai,
        };

        Ok(router::handle(&ctx, req).await)
    }
}
