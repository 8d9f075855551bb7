// src/main.rs
mod config;
mod control;
mod handlers;
mod identity;
mod models;
mod probe;
mod utils;

use actix_web::{web, App, HttpServer};
use env_logger::Env;
use governor::RateLimiter;
use log::info;

use crate::config::Config;
use crate::control::{ActionGate, ScriptTrigger};
use crate::identity::DiscordIdentityProvider;
use crate::probe::ServerStatusProber;
use crate::utils::{ControlLimiter, StatusLimiter};

type Gate = ActionGate<DiscordIdentityProvider, ScriptTrigger>;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("debug"));

    dotenv::dotenv().ok();

    let config = Config::from_env();
    config.log_policy_warnings();

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "80".to_string());
    let bind = format!("{}:{}", bind_address, port);

    let prober = web::Data::new(ServerStatusProber::new(config.probe_timeout()));

    let gate: web::Data<Gate> = web::Data::new(ActionGate::new(
        DiscordIdentityProvider::new(config.identity_api_base.clone(), config.guild_id.clone()),
        ScriptTrigger::new(config.control_script.clone()),
        config.start_policy.clone(),
        config.stop_policy.clone(),
        config.endpoints.len() as u16,
    ));

    let status_rate_limiter =
        web::Data::new(StatusLimiter(RateLimiter::keyed(config.status_quota())));
    let control_rate_limiter =
        web::Data::new(ControlLimiter(RateLimiter::keyed(config.control_quota())));

    let config = web::Data::new(config);

    info!("Starting server on {}", bind);
    HttpServer::new(move || {
        App::new()
            .app_data(config.clone())
            .app_data(prober.clone())
            .app_data(gate.clone())
            .app_data(status_rate_limiter.clone())
            .app_data(control_rate_limiter.clone())
            .route("/", web::get().to(handlers::index::index))
            .route("/server/status", web::get().to(handlers::status::get_status))
            .route(
                "/server/start",
                web::post().to(handlers::control::start_server::<DiscordIdentityProvider, ScriptTrigger>),
            )
            .route(
                "/server/stop",
                web::post().to(handlers::control::stop_server::<DiscordIdentityProvider, ScriptTrigger>),
            )
    })
    .bind(&bind)?
    .run()
    .await
}
