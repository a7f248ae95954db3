use crate::cli::Args;
use crate::engine::averaging::AveragingPolicy;
use anyhow::Context;
use axum::Router;
use axum::extract::FromRef;
use axum::routing::{get, post};
use axum_keycloak_auth::PassthroughMode;
use axum_keycloak_auth::instance::{KeycloakAuthInstance, KeycloakConfig};
use axum_keycloak_auth::layer::KeycloakAuthLayer;
use deadpool_diesel::Runtime;
use deadpool_diesel::postgres::{Manager, Pool};
use tracing::info;

pub mod cli;
pub mod engine;
pub mod model;
pub mod payloads;
pub mod response;
pub mod schema;

mod api;
mod errors;

/// Shared handler state. Handlers extract only the part they need.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub averaging: AveragingPolicy,
}

impl FromRef<AppState> for Pool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for AveragingPolicy {
    fn from_ref(state: &AppState) -> Self {
        state.averaging
    }
}

pub fn init_router(args: &Args) -> anyhow::Result<Router> {
    info!("Initializing averaging policy...");
    let averaging = args
        .averaging_policy()
        .context("Invalid averaging configuration")?;
    info!(
        "Averaging with assessment weight {} and '{:?}' missing-mark policy",
        averaging.assessment_weight, averaging.missing_marks
    );

    info!("Initializing database pool...");
    let pool = init_pool(&args.connection_str, args.db_pool_max_size)
        .context("Failed to initialize database pool")?;

    info!("Initializing Keycloak authentication layer...");
    let keycloak_layer =
        init_protection_layer(args).context("Failed to initialize Keycloak layer")?;

    info!("Initializing router...");
    Ok(init_router_internal(
        AppState { pool, averaging },
        keycloak_layer,
    ))
}

pub fn init_test_router(pool: Pool) -> Router {
    init_test_router_with_policy(pool, AveragingPolicy::default())
}

pub fn init_test_router_with_policy(pool: Pool, averaging: AveragingPolicy) -> Router {
    Router::new()
        .nest("/schedule", schedule_routes())
        .nest("/grading", grading_routes())
        .with_state(AppState { pool, averaging })
}

fn init_router_internal(state: AppState, keycloak_layer: KeycloakAuthLayer<String>) -> Router {
    let schedule_api = schedule_routes().layer(keycloak_layer.clone());
    let grading_api = grading_routes().layer(keycloak_layer);

    Router::new()
        .nest("/schedule", schedule_api)
        .nest("/grading", grading_api)
        .with_state(state)
}

fn init_pool(conn_str: &str, max_size: u32) -> anyhow::Result<Pool> {
    let manager = Manager::new(conn_str, Runtime::Tokio1);
    let pool = Pool::builder(manager).max_size(max_size as usize).build()?;
    Ok(pool)
}

fn init_protection_layer(args: &Args) -> anyhow::Result<KeycloakAuthLayer<String>> {
    let config = KeycloakConfig::builder()
        .server(args.keycloak_server_url.clone())
        .realm(args.keycloak_realm.clone())
        .build();

    let instance = KeycloakAuthInstance::new(config);

    let layer = KeycloakAuthLayer::builder()
        .instance(instance)
        .passthrough_mode(PassthroughMode::Block)
        .persist_raw_claims(false)
        .expected_audiences(vec![args.keycloak_audiences.clone()])
        .build();

    Ok(layer)
}

fn schedule_routes() -> Router<AppState> {
    Router::new()
        .route("/ensure_slots", post(api::schedule::ensure_slots))
        .route(
            "/get_grade_schedule",
            get(api::schedule::get_grade_schedule),
        )
        .route(
            "/validate_assignment",
            get(api::schedule::validate_assignment),
        )
        .route("/assign_class", post(api::schedule::assign_class))
        .route("/deactivate_slot", post(api::schedule::deactivate_slot))
}

fn grading_routes() -> Router<AppState> {
    Router::new()
        .route("/upsert_mark", post(api::grading::upsert_mark))
        .route("/remove_mark", post(api::grading::remove_mark))
        .route("/get_student_marks", get(api::grading::get_student_marks))
        .route(
            "/recompute_quarter_average",
            post(api::grading::recompute_quarter_average),
        )
        .route(
            "/recompute_yearly_average",
            post(api::grading::recompute_yearly_average),
        )
        .route(
            "/get_quarter_average",
            get(api::grading::get_quarter_average),
        )
        .route("/get_yearly_average", get(api::grading::get_yearly_average))
}
