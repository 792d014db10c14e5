use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};

use experiment_service::{
    config::Config,
    db, error, logging, routes,
    services::notifier::ChangeNotifier,
    state::AppState,
    websocket::GroupRegistry,
};

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();

    let cfg = Arc::new(Config::from_env()?);

    let db = db::init_pool(&cfg.database_url)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;

    let registry = GroupRegistry::new();
    let notifier = ChangeNotifier::new(registry.clone());

    let state = AppState {
        db,
        registry,
        notifier,
        config: cfg.clone(),
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting experiment-service");

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            // Library surface (API key authenticated)
            .service(routes::library::experiment_variant)
            .service(routes::library::user_experiments)
            .service(routes::library::identify_user)
            // Admin surface (JWT authenticated)
            .service(routes::admin_auth::login)
            .service(routes::admin_projects::list_projects)
            .service(routes::admin_projects::create_project)
            .service(routes::admin_projects::get_project)
            .service(routes::admin_projects::update_project)
            .service(routes::admin_projects::delete_project)
            .service(routes::admin_projects::regenerate_api_key)
            .service(routes::admin_experiments::list_experiments)
            .service(routes::admin_experiments::create_experiment)
            .service(routes::admin_experiments::get_experiment)
            .service(routes::admin_experiments::update_experiment)
            .service(routes::admin_experiments::delete_experiment)
            .service(routes::admin_experiments::experiment_stats)
            .service(routes::admin_experiments::recalculate_experiment)
            .service(routes::admin_experiments::bulk_update_variants)
            .service(routes::admin_variants::list_variants)
            .service(routes::admin_variants::create_variant)
            .service(routes::admin_variants::get_variant)
            .service(routes::admin_variants::update_variant)
            .service(routes::admin_variants::delete_variant)
            .service(routes::admin_users::list_users)
            .service(routes::admin_users::get_user)
            .service(routes::admin_users::user_distributions)
            .service(routes::admin_distributions::list_distributions)
            // Realtime channel
            .service(routes::wsroute::experiments_ws)
            .route("/health", web::get().to(|| async { "OK" }))
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("run: {e}")))
}
