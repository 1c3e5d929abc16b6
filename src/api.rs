use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{self, AuthUser};
use crate::db::DbHandle;
use crate::errors::{AuthError, SweepError};
use crate::models::{Priority, TaskStatus, User};
use crate::sweep::ReminderSweep;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub sweep: Arc<ReminderSweep>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct TasksQuery {
    pub project_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub project_id: i64,
    pub title: String,
    pub description: String,
    pub deadline: DateTime<Utc>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub assigned_to: Option<i64>,
}

/// Full-replace update: every field is resupplied.
#[derive(Deserialize)]
pub struct UpdateTaskRequest {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: String,
    pub deadline: DateTime<Utc>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub assigned_to: Option<i64>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/user", get(current_user))
        .route("/api/users", get(list_users))
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/{id}", get(get_project))
        .route(
            "/api/tasks",
            get(list_tasks).post(create_task).put(update_task),
        )
        .route("/api/cron", get(start_cron))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn signup(
    State(state): State<SharedState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() || req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest("All fields are required".to_string()));
    }

    let email = req.email.trim().to_string();
    let email_check = email.clone();
    let existing = state
        .db
        .call(move |db| db.get_user_by_email(&email_check))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if existing.is_some() {
        return Err(ApiError::Conflict(
            AuthError::EmailTaken { email }.to_string(),
        ));
    }

    // bcrypt is CPU-bound; keep it off the async workers.
    let password = req.password;
    let hash = tokio::task::spawn_blocking(move || auth::hash_password(&password))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let name = req.name.trim().to_string();
    let user = state
        .db
        .call(move |db| db.create_user(&name, &email, &hash))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_string();
    let email_lookup = email.clone();
    let credential = state
        .db
        .call(move |db| db.get_credential_hash(&email_lookup))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let unauthorized = || ApiError::Unauthorized(AuthError::InvalidCredentials.to_string());
    let (user_id, hash) = credential.ok_or_else(unauthorized)?;

    let password = req.password;
    let verified = tokio::task::spawn_blocking(move || auth::verify_password(&password, &hash))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !verified {
        return Err(unauthorized());
    }

    let token = auth::new_session_token();
    let expires_at = auth::session_expiry(Utc::now());
    let session_token = token.clone();
    let user = state
        .db
        .call(move |db| {
            db.create_session(&session_token, user_id, expires_at)?;
            db.get_user(user_id)?
                .ok_or_else(|| anyhow::anyhow!("User {} vanished during login", user_id))
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(LoginResponse { token, user }))
}

async fn logout(
    State(state): State<SharedState>,
    _user: AuthUser,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = auth::bearer_token(&headers)
        .ok_or_else(|| ApiError::Unauthorized("Unauthorized".to_string()))?;
    state
        .db
        .call(move |db| db.delete_session(&token))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(serde_json::json!({"message": "Logged out"})))
}

async fn current_user(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

async fn list_users(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let users = state
        .db
        .call(|db| db.list_users())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(users))
}

async fn list_projects(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let projects = state
        .db
        .call(|db| db.list_projects())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(projects))
}

async fn create_project(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("'name' is required".to_string()));
    }
    let name = req.name.trim().to_string();
    let description = req.description;
    let project = state
        .db
        .call(move |db| db.create_project(user.id, &name, description.as_deref()))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| db.get_project(id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("Project {} not found", id)))?;
    Ok(Json(project))
}

async fn list_tasks(
    State(state): State<SharedState>,
    Query(query): Query<TasksQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let project_id = query
        .project_id
        .ok_or_else(|| ApiError::BadRequest("Project ID is required".to_string()))?;
    let tasks = state
        .db
        .call(move |db| db.list_tasks(project_id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<SharedState>,
    _user: AuthUser,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("All fields are required".to_string()));
    }
    let task = state
        .db
        .call(move |db| {
            if db.get_project(req.project_id)?.is_none() {
                anyhow::bail!("Project {} not found", req.project_id);
            }
            db.create_task(
                req.project_id,
                req.title.trim(),
                &req.description,
                req.deadline,
                &req.priority,
                &req.status,
                req.assigned_to,
            )
        })
        .await
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("not found") {
                ApiError::BadRequest(msg)
            } else {
                ApiError::Internal(msg)
            }
        })?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<SharedState>,
    _user: AuthUser,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "All fields are required for update".to_string(),
        ));
    }
    let task = state
        .db
        .call(move |db| {
            db.update_task(
                req.id,
                req.project_id,
                req.title.trim(),
                &req.description,
                req.deadline,
                &req.priority,
                &req.status,
                req.assigned_to,
            )
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", req.id)))?;
    Ok(Json(task))
}

/// Install the reminder schedule. GET only; repeat calls are answered
/// without stacking another timer.
async fn start_cron(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    match state.sweep.start() {
        Ok(()) => Ok(Json(serde_json::json!({
            "message": "Reminder sweep scheduled for 12-hour checks"
        }))),
        Err(SweepError::AlreadyRunning) => Ok(Json(serde_json::json!({
            "message": "Reminder sweep already running"
        }))),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}
