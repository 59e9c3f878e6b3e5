//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::warn;

use crate::actions::{
    self, AddExpenseRequest, AddMilestoneRequest, CreateProjectRequest, RoleGrantRequest,
};
use crate::contract::{ProjectTracker, TrackerCall};
use crate::errors::{DashboardError, ErrorKind, Result};
use crate::queries::{self, Partial, ProjectFilter, Skipped};
use crate::session::{SessionHandle, SessionSnapshot};
use crate::types::{ContractNotification, Timestamp};

#[derive(Clone)]
pub struct ApiState {
    pub session: SessionHandle,
}

fn now() -> Timestamp {
    chrono::Utc::now().timestamp()
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
    pub retryable: bool,
}

/// A list view. `complete` is false when some items could not be loaded.
#[derive(Serialize)]
pub struct ListResponse<T> {
    pub count: usize,
    pub complete: bool,
    pub skipped: Vec<Skipped>,
    pub items: Vec<T>,
}

impl<T> From<Partial<Vec<T>>> for ListResponse<T> {
    fn from(partial: Partial<Vec<T>>) -> Self {
        Self {
            count: partial.value.len(),
            complete: partial.is_complete(),
            skipped: partial.skipped,
            items: partial.value,
        }
    }
}

#[derive(Serialize)]
pub struct ViewResponse<T> {
    pub complete: bool,
    pub skipped: Vec<Skipped>,
    pub data: T,
}

impl<T> From<Partial<T>> for ViewResponse<T> {
    fn from(partial: Partial<T>) -> Self {
        Self {
            complete: partial.is_complete(),
            skipped: partial.skipped,
            data: partial.value,
        }
    }
}

#[derive(Serialize)]
pub struct InboxResponse {
    pub count: usize,
    pub unread: usize,
    pub notifications: Vec<ContractNotification>,
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::WalletUnavailable
        | ErrorKind::UserRejected
        | ErrorKind::NoAccounts
        | ErrorKind::NotConnected => StatusCode::UNAUTHORIZED,
        ErrorKind::MissingCapability => StatusCode::FORBIDDEN,
        ErrorKind::StaleHandle => StatusCode::CONFLICT,
        ErrorKind::ChainCallReverted | ErrorKind::SubmissionRejected | ErrorKind::InvalidInput => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::FinalizationFailed
        | ErrorKind::TopLevelQueryFailure
        | ErrorKind::Decode
        | ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: DashboardError) -> Response {
    let kind = e.kind();
    let status = status_for(kind);
    if status.is_server_error() {
        warn!("Request failed: {e}");
    }
    (
        status,
        Json(serde_json::json!(ErrorResponse {
            error: e.to_string(),
            kind,
            retryable: kind.is_retryable(),
        })),
    )
        .into_response()
}

fn respond<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(serde_json::json!(body))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn submit(session: &SessionHandle, call: Result<TrackerCall>) -> Response {
    let call = match call {
        Ok(call) => call,
        Err(e) => return error_response(e),
    };
    let result = session
        .with_contract(|contract| {
            let call = call.clone();
            let roles = session.roles();
            async move { actions::execute(&contract, roles, call).await }
        })
        .await;
    respond(result)
}

// ─────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /session`
pub async fn get_session(State(state): State<Arc<ApiState>>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot())
}

/// `POST /session/connect`
///
/// Prompts the wallet for an account and returns the resulting session.
pub async fn connect(State(state): State<Arc<ApiState>>) -> Response {
    let result = state.session.connect().await;
    respond(result.map(|_| state.session.snapshot()))
}

/// `POST /session/disconnect`
pub async fn disconnect(State(state): State<Arc<ApiState>>) -> Response {
    let result = state.session.disconnect().await;
    respond(result.map(|()| state.session.snapshot()))
}

/// `POST /session/roles`
pub async fn refresh_roles(State(state): State<Arc<ApiState>>) -> Response {
    respond(state.session.refresh_roles().await)
}

// ─────────────────────────────────────────────────────────
// Aggregated views
// ─────────────────────────────────────────────────────────

/// `GET /projects?status=&sortBy=&search=`
pub async fn get_projects(
    State(state): State<Arc<ApiState>>,
    Query(filter): Query<ProjectFilter>,
) -> Response {
    let result = state
        .session
        .with_contract(|c| async move { queries::load_all_projects_summary(&c).await })
        .await
        .map(|partial| ListResponse::from(partial.map(|projects| filter.apply(projects))));
    respond(result)
}

/// `GET /projects/:id`
///
/// The project with every milestone and each milestone's expenses.
pub async fn get_project(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<u64>,
) -> Response {
    let result = state
        .session
        .with_contract(|c| async move { queries::load_project_tree(&c, project_id).await })
        .await
        .map(ViewResponse::from);
    respond(result)
}

/// `GET /projects/:id/milestones/:milestone_id`
pub async fn get_milestone(
    State(state): State<Arc<ApiState>>,
    Path((project_id, milestone_id)): Path<(u64, u64)>,
) -> Response {
    let result = state
        .session
        .with_contract(|c| async move {
            queries::load_milestone(&c, project_id, milestone_id).await
        })
        .await
        .map(ViewResponse::from);
    respond(result)
}

/// `GET /projects/:id/expenses/:expense_id`
pub async fn get_expense(
    State(state): State<Arc<ApiState>>,
    Path((project_id, expense_id)): Path<(u64, u64)>,
) -> Response {
    let result = state
        .session
        .with_contract(|c| async move { queries::load_expense(&c, project_id, expense_id).await })
        .await;
    respond(result)
}

/// `GET /milestones`
pub async fn get_milestones(State(state): State<Arc<ApiState>>) -> Response {
    let now = now();
    let result = state
        .session
        .with_contract(|c| async move { queries::load_flat_milestones(&c, now).await })
        .await
        .map(ListResponse::from);
    respond(result)
}

/// `GET /expenses`
pub async fn get_expenses(State(state): State<Arc<ApiState>>) -> Response {
    let now = now();
    let result = state
        .session
        .with_contract(|c| async move { queries::load_flat_expenses(&c, now).await })
        .await
        .map(ListResponse::from);
    respond(result)
}

/// `GET /notifications`
pub async fn get_notifications(State(state): State<Arc<ApiState>>) -> Response {
    let now = now();
    let result = state
        .session
        .with_contract(|c| async move { queries::derive_notifications(&c, now).await })
        .await
        .map(ListResponse::from);
    respond(result)
}

/// `GET /dashboard`
pub async fn get_dashboard(State(state): State<Arc<ApiState>>) -> Response {
    let result = state
        .session
        .with_contract(|c| async move { queries::load_dashboard_stats(&c).await })
        .await
        .map(ViewResponse::from);
    respond(result)
}

/// `GET /inbox`
///
/// The contract-held notifications addressed to the connected account.
pub async fn get_inbox(State(state): State<Arc<ApiState>>) -> Response {
    let result = state
        .session
        .with_contract(|c| async move { c.get_notifications(c.signer()).await })
        .await
        .map(|notifications| InboxResponse {
            count: notifications.len(),
            unread: notifications.iter().filter(|n| !n.is_read).count(),
            notifications,
        });
    respond(result)
}

// ─────────────────────────────────────────────────────────
// Writes
// ─────────────────────────────────────────────────────────

/// `POST /inbox/:index/read`
pub async fn mark_inbox_read(
    State(state): State<Arc<ApiState>>,
    Path(index): Path<u64>,
) -> Response {
    submit(
        &state.session,
        Ok(TrackerCall::MarkNotificationAsRead { index }),
    )
    .await
}

/// `POST /projects`
pub async fn create_project(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateProjectRequest>,
) -> Response {
    submit(&state.session, body.into_call()).await
}

/// `POST /projects/:id/milestones`
pub async fn add_milestone(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<u64>,
    Json(body): Json<AddMilestoneRequest>,
) -> Response {
    submit(&state.session, body.into_call(project_id)).await
}

/// `POST /projects/:id/expenses`
pub async fn add_expense(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<u64>,
    Json(body): Json<AddExpenseRequest>,
) -> Response {
    submit(&state.session, body.into_call(project_id)).await
}

/// `POST /projects/:id/milestones/:milestone_id/complete`
pub async fn complete_milestone(
    State(state): State<Arc<ApiState>>,
    Path((project_id, milestone_id)): Path<(u64, u64)>,
) -> Response {
    submit(
        &state.session,
        Ok(TrackerCall::CompleteMilestone {
            project_id,
            milestone_id,
        }),
    )
    .await
}

/// `POST /projects/:id/complete`
pub async fn complete_project(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<u64>,
) -> Response {
    submit(&state.session, Ok(TrackerCall::CompleteProject { project_id })).await
}

/// `POST /roles/grant`
pub async fn grant_role(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<RoleGrantRequest>,
) -> Response {
    submit(&state.session, Ok(body.grant())).await
}

/// `POST /roles/revoke`
pub async fn revoke_role(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<RoleGrantRequest>,
) -> Response {
    submit(&state.session, Ok(body.revoke())).await
}
