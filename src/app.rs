use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, post, put},
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::adapter::SpreadsheetAdapter;
use crate::audit::AuditEntry;
use crate::config::Config;
use crate::error::AppError;
use crate::google::GoogleSheetsClient;
use crate::login::{self, SessionStore, User};
use crate::portal::Portal;
use crate::record::Record;
use crate::sheets::SheetsClient;
use crate::store::Database;

pub struct AppState<C: SheetsClient> {
    pub portal: Portal<C>,
    pub sessions: SessionStore,
}

impl<C: SheetsClient> AppState<C> {
    pub fn new(portal: Portal<C>, sessions: SessionStore) -> Self {
        AppState { portal, sessions }
    }
}

type SharedState<C> = State<Arc<AppState<C>>>;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldUpdate {
    #[serde(default)]
    field_name: String,
    #[serde(default)]
    value: Value,
}

#[derive(Deserialize)]
struct AuditQuery {
    limit: Option<u32>,
    user_id: Option<i64>,
}

#[derive(Deserialize)]
struct ProgramAssignment {
    #[serde(default)]
    programs: Vec<String>,
}

/// Start the portal server with the given configuration.
///
/// Opens the database, seeds the first admin when `ADMIN_PASSWORD` is set
/// and the users table is empty, then serves until the process stops.
/// A spreadsheet that cannot be reached at startup is logged, not fatal.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open_path(&config.database_path)?;
    info!("Database ready at {}", config.database_path.display());

    let client_config = config.clone();
    let adapter = SpreadsheetAdapter::new(config.sheet.clone(), move || {
        GoogleSheetsClient::from_config(&client_config)
    });
    let portal = Portal::new(adapter, db);

    match &config.admin_password {
        Some(password) => {
            if portal.accounts.seed_admin_if_empty(password)? {
                info!("Seeded initial admin account");
            }
        }
        None => warn!("ADMIN_PASSWORD not set, no admin account will be seeded"),
    }

    if let Err(e) = portal.adapter.reconnect() {
        warn!("Spreadsheet not available at startup: {e}");
    }

    let app_state = Arc::new(AppState::new(portal, SessionStore::new(config.session_ttl)));
    let app = router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the full router: public routes plus everything behind the session
/// check.
pub fn router<C: SheetsClient>(state: Arc<AppState<C>>) -> Router {
    let protected = Router::new()
        .route("/api/auth/logout", post(login::handle_logout::<C>))
        .route("/api/auth/me", get(login::handle_me))
        .route("/api/applications", get(list_applications::<C>))
        .route(
            "/api/applications/:row_index",
            get(view_application::<C>).patch(update_application::<C>),
        )
        .route(
            "/api/applications/:row_index/history",
            get(application_history::<C>),
        )
        .route("/api/audit", get(audit_log::<C>))
        .route("/api/programs", get(list_programs::<C>))
        .route(
            "/api/reviewer-programs/:user_id",
            get(reviewer_programs::<C>).put(assign_programs::<C>),
        )
        .route(
            "/api/reviewer-programs/:user_id/:program",
            delete(unassign_program::<C>),
        )
        .route(
            "/api/users",
            get(login::list_users::<C>).post(login::create_user::<C>),
        )
        .route(
            "/api/users/change-password",
            put(login::handle_change_password::<C>),
        )
        .route("/api/users/:id", delete(login::delete_user::<C>))
        .route(
            "/api/users/:id/password",
            put(login::handle_reset_password::<C>),
        )
        .route("/api/admin/sheets/reconnect", post(reconnect_sheets::<C>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            login::require_auth::<C>,
        ));

    Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/login", post(login::handle_login::<C>))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn parse_row_index(raw: &str) -> Result<u32, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::ValidationFailed(format!("Invalid row index: {raw}")))
}

// Strings pass through; numbers and booleans are written as their text.
fn cell_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other @ (Value::Number(_) | Value::Bool(_)) => Some(other.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn list_applications<C: SheetsClient>(
    State(state): SharedState<C>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<Record>>, AppError> {
    Ok(Json(state.portal.list_applications(&user).await?))
}

async fn view_application<C: SheetsClient>(
    State(state): SharedState<C>,
    Extension(user): Extension<User>,
    Path(row_index): Path<String>,
) -> Result<Json<Record>, AppError> {
    let row_index = parse_row_index(&row_index)?;
    Ok(Json(state.portal.view_application(&user, row_index).await?))
}

async fn update_application<C: SheetsClient>(
    State(state): SharedState<C>,
    Extension(user): Extension<User>,
    Path(row_index): Path<String>,
    WithRejection(Json(update), _): WithRejection<Json<FieldUpdate>, AppError>,
) -> Result<Json<Value>, AppError> {
    let row_index = parse_row_index(&row_index)?;
    let value = cell_value(&update.value);
    state
        .portal
        .update_application(&user, row_index, &update.field_name, value.as_deref())
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Application updated successfully",
    })))
}

async fn application_history<C: SheetsClient>(
    State(state): SharedState<C>,
    Path(row_index): Path<String>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    let row_index = parse_row_index(&row_index)?;
    Ok(Json(state.portal.application_history(row_index)?))
}

async fn audit_log<C: SheetsClient>(
    State(state): SharedState<C>,
    Extension(user): Extension<User>,
    WithRejection(Query(query), _): WithRejection<Query<AuditQuery>, AppError>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    Ok(Json(state.portal.audit_log(
        &user,
        query.limit,
        query.user_id,
    )?))
}

async fn list_programs<C: SheetsClient>(
    State(state): SharedState<C>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.portal.programs(&user).await?))
}

async fn reviewer_programs<C: SheetsClient>(
    State(state): SharedState<C>,
    Extension(user): Extension<User>,
    WithRejection(Path(user_id), _): WithRejection<Path<i64>, AppError>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.portal.reviewer_programs(&user, user_id)?))
}

async fn assign_programs<C: SheetsClient>(
    State(state): SharedState<C>,
    Extension(user): Extension<User>,
    WithRejection(Path(user_id), _): WithRejection<Path<i64>, AppError>,
    WithRejection(Json(assignment), _): WithRejection<Json<ProgramAssignment>, AppError>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.portal.assign_programs(
        &user,
        user_id,
        &assignment.programs,
    )?))
}

async fn unassign_program<C: SheetsClient>(
    State(state): SharedState<C>,
    Extension(user): Extension<User>,
    WithRejection(Path((user_id, program)), _): WithRejection<Path<(i64, String)>, AppError>,
) -> Result<StatusCode, AppError> {
    state.portal.unassign_program(&user, user_id, &program)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reconnect_sheets<C: SheetsClient>(
    State(state): SharedState<C>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    state.portal.reconnect_sheets(&user)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Spreadsheet client reconnected",
    })))
}
