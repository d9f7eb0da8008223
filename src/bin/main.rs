#[cfg(not(target_arch = "wasm32"))]
mod native {
    extern crate fitsocial;

    use std::sync::Arc;

    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
    use fitsocial::analysis::ChatCompletionsClient;
    use fitsocial::config::Config;
    use fitsocial::core::db::init_demo_data;
    use fitsocial::core::store::MemoryKv;
    use fitsocial::router::{self, AppContext};

    struct AppState {
        store: Arc<MemoryKv>,
        config: Config,
        ai: ChatCompletionsClient,
    }

    mod adapter {
        use actix_web::HttpRequest;
        use spin_sdk::http::{Method, Request};

        pub fn actix_to_spin_request(req: &HttpRequest, body: actix_web::web::Bytes) -> anyhow::Result<Request> {
            let method = match req.method().as_str() {
                "GET" => Method::Get,
                "POST" => Method::Post,
                "PUT" => Method::Put,
                "DELETE" => Method::Delete,
                "HEAD" => Method::Head,
                "OPTIONS" => Method::Options,
                "PATCH" => Method::Patch,
                other => anyhow::bail!("unsupported method {}", other),
            };

            let uri = req.uri().to_string();

            let mut builder = Request::builder();
            builder.method(method).uri(&uri);
            for (name, value) in req.headers() {
                if let Ok(val_str) = value.to_str() {
                    builder.header(name.as_str(), val_str);
                }
            }

            Ok(builder.body(body.to_vec()).build())
        }

        pub fn spin_to_actix_response(spin_resp: spin_sdk::http::Response) -> actix_web::HttpResponse {
            let status = actix_web::http::StatusCode::from_u16(*spin_resp.status())
                .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);

            let mut response = actix_web::HttpResponse::build(status);
            for (name, value) in spin_resp.headers() {
                if let Some(v) = value.as_str() {
                    response.append_header((name, v));
                }
            }

            response.body(spin_resp.body().to_vec())
        }
    }

    pub async fn run() -> std::io::Result<()> {
        dotenvy::dotenv().ok();
        fitsocial::logging::init();

        let config = Config::from_env();
        let store = Arc::new(MemoryKv::new());
        if config.seed_demo_data {
            if let Err(e) = init_demo_data(store.as_ref()) {
                tracing::error!(error = %e, "demo data seeding failed");
            }
        }
        if config.ai.api_key.is_none() {
            tracing::info!("AI_API_KEY not set, workout analysis uses the local template");
        }

        let bind_addr = config.bind_addr.clone();
        let state = web::Data::new(AppState {
            ai: ChatCompletionsClient::new(config.ai.clone()),
            store,
            config,
        });

        tracing::info!("Server listening on http://{}", bind_addr);

        HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .app_data(web::PayloadConfig::new(1 << 20))
                .default_service(web::route().to(handle_all))
        })
        .bind(bind_addr)?
        .run()
        .await
    }

    async fn handle_all(req: HttpRequest, body: web::Bytes, state: web::Data<AppState>) -> HttpResponse {
        let spin_req = match adapter::actix_to_spin_request(&req, body) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "rejecting request");
                return HttpResponse::MethodNotAllowed().json(serde_json::json!({ "message": "Method not allowed" }));
            }
        };

        let ctx = AppContext {
            store: state.store.as_ref(),
            config: &state.config,
            ai: &state.ai,
        };
        adapter::spin_to_actix_response(router::handle(&ctx, spin_req).await)
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    native::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
