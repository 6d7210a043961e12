use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{
    paging, ApplicationList, ApplicationStatusRequest, ConversationList, CreateApplicationRequest,
    CreateProjectRequest, MessageList, PageQuery, ProjectDetails, ProjectList, ProjectQuery,
    ProjectStatusRequest, SendMessageRequest, UserStatsResponse,
};
use super::model::{
    application_transition_allowed, unread_ids, Application, ApplicationActor, Message,
    NewApplication, Project, ProjectFilter, ProjectStatus,
};
use super::repo;
use crate::{
    accounts::{AccountType, StoreError},
    auth::extractors::{AuthUser, ClientUser, FreelancerUser, MaybeAuthUser},
    error::ApiError,
    state::AppState,
};

pub fn project_routes() -> Router<AppState> {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/:id", get(get_project))
        .route("/api/projects/:id/status", patch(update_project_status))
        .route(
            "/api/projects/:id/applications",
            get(list_project_applications).post(apply_to_project),
        )
        .route("/api/my-projects", get(my_projects))
}

pub fn application_routes() -> Router<AppState> {
    Router::new()
        .route("/api/my-applications", get(my_applications))
        .route("/api/applications/:id", patch(update_application_status))
}

pub fn message_routes() -> Router<AppState> {
    Router::new()
        .route("/api/messages", post(send_message))
        .route("/api/messages/conversations", get(list_conversations))
        .route("/api/messages/:user_id", get(get_thread))
}

pub fn stats_routes() -> Router<AppState> {
    Router::new().route("/api/user-stats", get(user_stats))
}

fn project_not_found() -> ApiError {
    ApiError::NotFound("project not found".into())
}

/// Loads a project the caller owns. Someone else's project reads as missing.
async fn owned_project(state: &AppState, id: Uuid, client_id: Uuid) -> Result<Project, ApiError> {
    match repo::get_project(state.db()?, id).await? {
        Some(p) if p.client_id == client_id => Ok(p),
        _ => Err(project_not_found()),
    }
}

// --- projects ---

#[instrument(skip(state))]
pub async fn list_projects(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<ProjectList>, ApiError> {
    let filter = ProjectFilter::from(query);
    let items = repo::list_open_projects(state.db()?, &filter).await?;
    Ok(Json(ProjectList { items }))
}

#[instrument(skip(state, viewer))]
pub async fn get_project(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ProjectDetails>, ApiError> {
    let db = state.db()?;
    let project = repo::get_project(db, id).await?.ok_or_else(project_not_found)?;

    let has_applied = match viewer {
        Some(v) if v.account_type == AccountType::Freelancer => {
            Some(repo::has_applied(db, id, v.user_id).await?)
        }
        _ => None,
    };
    Ok(Json(ProjectDetails {
        project,
        has_applied,
    }))
}

#[instrument(skip_all, fields(client_id = %client.user_id))]
pub async fn create_project(
    State(state): State<AppState>,
    ClientUser(client): ClientUser,
    Json(payload): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    let new_project = payload.validate(client.user_id)?;
    let project = repo::insert_project(state.db()?, new_project).await?;
    info!(project_id = %project.id, "project created");
    Ok((StatusCode::CREATED, Json(project)))
}

#[instrument(skip_all, fields(client_id = %client.user_id))]
pub async fn my_projects(
    State(state): State<AppState>,
    ClientUser(client): ClientUser,
) -> Result<Json<ProjectList>, ApiError> {
    let items = repo::list_projects_by_client(state.db()?, client.user_id).await?;
    Ok(Json(ProjectList { items }))
}

#[instrument(skip(state, client, payload), fields(client_id = %client.user_id))]
pub async fn update_project_status(
    State(state): State<AppState>,
    ClientUser(client): ClientUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProjectStatusRequest>,
) -> Result<Json<Project>, ApiError> {
    let project = owned_project(&state, id, client.user_id).await?;
    if !project.status.can_become(payload.status) {
        return Err(ApiError::Conflict(format!(
            "project cannot move from {} to {}",
            project.status, payload.status
        )));
    }
    let project = repo::update_project_status(state.db()?, id, payload.status).await?;
    info!(status = %project.status, "project status changed");
    Ok(Json(project))
}

// --- applications ---

#[instrument(skip(state, freelancer, payload), fields(freelancer_id = %freelancer.user_id))]
pub async fn apply_to_project(
    State(state): State<AppState>,
    FreelancerUser(freelancer): FreelancerUser,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<CreateApplicationRequest>,
) -> Result<(StatusCode, Json<Application>), ApiError> {
    let (cover_letter, proposed_rate, estimated_duration) = payload.validate()?;
    let db = state.db()?;

    let project = repo::get_project(db, project_id)
        .await?
        .ok_or_else(project_not_found)?;
    if project.status != ProjectStatus::Open {
        return Err(ApiError::Conflict("project is not accepting applications".into()));
    }

    let new_application = NewApplication {
        project_id,
        freelancer_id: freelancer.user_id,
        cover_letter,
        proposed_rate,
        estimated_duration,
    };
    let application = match repo::insert_application(db, new_application).await {
        Ok(a) => a,
        Err(StoreError::UniqueViolation(_)) => {
            return Err(ApiError::Conflict("already applied to this project".into()));
        }
        Err(e) => return Err(e.into()),
    };
    info!(application_id = %application.id, "application submitted");
    Ok((StatusCode::CREATED, Json(application)))
}

#[instrument(skip(state, client), fields(client_id = %client.user_id))]
pub async fn list_project_applications(
    State(state): State<AppState>,
    ClientUser(client): ClientUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApplicationList>, ApiError> {
    owned_project(&state, id, client.user_id).await?;
    let items = repo::list_applications_for_project(state.db()?, id).await?;
    Ok(Json(ApplicationList { items }))
}

#[instrument(skip_all, fields(freelancer_id = %freelancer.user_id))]
pub async fn my_applications(
    State(state): State<AppState>,
    FreelancerUser(freelancer): FreelancerUser,
) -> Result<Json<ApplicationList>, ApiError> {
    let items = repo::list_applications_by_freelancer(state.db()?, freelancer.user_id).await?;
    Ok(Json(ApplicationList { items }))
}

#[instrument(skip(state, user, payload), fields(user_id = %user.user_id))]
pub async fn update_application_status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ApplicationStatusRequest>,
) -> Result<Json<Application>, ApiError> {
    let db = state.db()?;
    let not_found = || ApiError::NotFound("application not found".into());
    let application = repo::get_application(db, id).await?.ok_or_else(not_found)?;

    let actor = match user.account_type {
        AccountType::Freelancer if application.freelancer_id == user.user_id => {
            ApplicationActor::Applicant
        }
        AccountType::Client => {
            owned_project(&state, application.project_id, user.user_id)
                .await
                .map_err(|_| not_found())?;
            ApplicationActor::ProjectOwner
        }
        _ => return Err(not_found()),
    };

    if !application_transition_allowed(actor, application.status, payload.status) {
        warn!(from = %application.status, to = %payload.status, ?actor, "application transition refused");
        return Err(ApiError::Conflict(format!(
            "application cannot move from {} to {}",
            application.status, payload.status
        )));
    }

    let application = repo::update_application_status(db, id, payload.status).await?;
    info!(status = %application.status, "application status changed");
    Ok(Json(application))
}

// --- messages ---

#[instrument(skip(state, sender, payload), fields(sender_id = %sender.user_id))]
pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(sender): AuthUser,
    Json(payload): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let content = payload.validate(sender.user_id)?;

    if state
        .accounts()?
        .find_by_id(payload.recipient_id)
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound("recipient not found".into()));
    }

    let message = repo::insert_message(
        state.db()?,
        sender.user_id,
        payload.recipient_id,
        payload.project_id,
        &content,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[instrument(skip_all, fields(user_id = %user.user_id))]
pub async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<ConversationList>, ApiError> {
    let items = repo::list_conversations(state.db()?, user.user_id).await?;
    Ok(Json(ConversationList { items }))
}

#[instrument(skip(state, user, page), fields(user_id = %user.user_id))]
pub async fn get_thread(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(other_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<Json<MessageList>, ApiError> {
    let db = state.db()?;
    let (limit, offset) = paging(page.limit, page.offset);
    let items = repo::thread(db, user.user_id, other_id, limit, offset).await?;
    let seen = unread_ids(&items, user.user_id);
    let marked = repo::mark_read(db, user.user_id, other_id, &seen).await?;
    if marked > 0 {
        info!(marked, "messages marked read");
    }
    Ok(Json(MessageList { items }))
}

// --- stats ---

#[instrument(skip_all, fields(user_id = %user.user_id))]
pub async fn user_stats(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<UserStatsResponse>, ApiError> {
    let stats = repo::user_stats(state.db()?, user.user_id).await?;
    Ok(Json(UserStatsResponse::for_type(user.account_type, stats)))
}
