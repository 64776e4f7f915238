use std::process;
use std::sync::Arc;

use axum::{routing::get, Router};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::net::TcpListener;
use tower_http::{
    compression::CompressionLayer, limit::RequestBodyLimitLayer,
    validate_request::ValidateRequestHeaderLayer,
};
use tracing_subscriber::{
    fmt::{writer::BoxMakeWriter, Layer},
    layer::SubscriberExt,
    EnvFilter, Registry,
};

use lostfound_backend::config::Config;
use lostfound_backend::db::auth::AuthRepository;
use lostfound_backend::db::request::PgRequestStore;
use lostfound_backend::db::tx::TxRepository;
use lostfound_backend::gateway::{PaymentGateway, PortOneGateway};
use lostfound_backend::lifecycle::LifecycleService;
use lostfound_backend::notify::{LogNotifier, NotificationSender};
use lostfound_backend::routes;
use lostfound_backend::routes::auth::AuthService;
use lostfound_backend::routes::payments::PaymentsState;

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {err}");
            process::exit(1);
        }
    };

    // add tracing layer
    let file_appender = tracing_appender::rolling::never(".", &config.log_file);
    let (file_writer, _file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, _stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = Layer::new()
        .json()
        .with_writer(BoxMakeWriter::new(move || file_writer.clone()));
    let stdout_layer = Layer::new().with_writer(BoxMakeWriter::new(move || stdout_writer.clone()));

    let subscriber = Registry::default()
        .with(EnvFilter::from_default_env())
        .with(file_layer)
        .with(stdout_layer);

    tracing::subscriber::set_global_default(subscriber).expect("Unable to set global subscriber");

    let database_pool =
        match process_database(&config.database_url, config.max_connection_pooling).await {
            Ok(db) => {
                tracing::info!("Connected to database");
                db
            }
            Err(err) => {
                tracing::error!("Failed to connect to database: {}", err);
                process::exit(1);
            }
        };

    let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(port) => {
            tracing::info!("Listening on port: {}", port.local_addr().unwrap().port());
            port
        }
        Err(err) => {
            tracing::error!("Failed to bind to port: {}", err);
            process::exit(1);
        }
    };

    let router = match process_begin(database_pool, config) {
        Ok(router) => {
            tracing::info!("Routes constructed successfully");
            router
        }
        Err(err) => {
            tracing::error!("Failed to construct routes: {}", err);
            process::exit(1);
        }
    };

    //start the http service
    let http_service = axum::serve(listener, router);
    if let Err(err) = http_service.await {
        tracing::error!("Failed to start server: {}", err);
        process::exit(1);
    }
}

fn process_begin(db_pool: PgPool, config: Config) -> Result<Router, String> {
    let repo = AuthRepository::new(db_pool.clone());
    let auth_service = Arc::new(AuthService::new(repo, config.jwt_secret));

    let notifier: Arc<dyn NotificationSender> = Arc::new(LogNotifier);
    let lifecycle = Arc::new(LifecycleService::new(
        PgRequestStore::new(db_pool.clone()),
        notifier,
    ));

    let gateway: Arc<dyn PaymentGateway> = Arc::new(PortOneGateway::new(
        config.portone_base_url,
        config.portone_api_key,
        config.portone_api_secret,
    ));
    let payments_state = PaymentsState {
        auth: auth_service.clone(),
        txs: TxRepository::new(db_pool.clone()),
        gateway,
        lifecycle: lifecycle.clone(),
    };

    let auth_routes = routes::auth::auth_routes(auth_service.clone());
    let request_routes = routes::requests::request_routes(auth_service.clone(), lifecycle.clone())
        .route_layer(CompressionLayer::new().gzip(true));
    let admin_routes = routes::admin::admin_routes(auth_service, lifecycle)
        .route_layer(ValidateRequestHeaderLayer::accept("application/json"));
    let payment_routes = routes::payments::payment_routes(payments_state)
        .route_layer(ValidateRequestHeaderLayer::accept("application/json"));

    let health_routes = Router::new().route("/health", get(health)).with_state(db_pool);

    let router = Router::new()
        .merge(auth_routes)
        .merge(request_routes)
        .merge(admin_routes)
        .merge(payment_routes)
        .merge(health_routes)
        .route_layer(RequestBodyLimitLayer::new(1024 * 1024 * 10)); //10MB limit

    Ok(router)
}

async fn health(
    axum::extract::State(pool): axum::extract::State<PgPool>,
) -> (axum::http::StatusCode, &'static str) {
    match sqlx::query("SELECT 1").fetch_one(&pool).await {
        Ok(_) => (axum::http::StatusCode::OK, "ok"),
        Err(err) => {
            tracing::error!("health check failed: {err}");
            (axum::http::StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

async fn process_database(url: &str, max_conn_pool: u32) -> Result<PgPool, String> {
    // create a connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(max_conn_pool)
        .connect(url)
        .await
        .map_err(|err| format!("Failed to connect to database: {}", err))?;

    match sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|err| format!("Failed to run migrations: {}", err))
    {
        Ok(_) => {
            tracing::info!("Migrations run successfully");
        }
        Err(err) => {
            // if it fails we assume to continue believing that the database is already migrated
            tracing::warn!("Failed to run migrations: {err}");
        }
    }

    Ok(db_pool)
}
