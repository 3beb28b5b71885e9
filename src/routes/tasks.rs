use crate::{
    error::{AppError, Result},
    models::{
        response::ApiResponse,
        task::{
            PermissionResult, RemoveShareRequest, ShareTaskRequest, TaskAction, TaskShareGrant,
            TaskSharingState, UpdateSharingRequest,
        },
    },
    state::AppState,
    utils::middleware::RequireAuth,
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct PermissionQuery {
    pub action: Option<TaskAction>,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:task_id/permission", get(check_permission))
        .route("/:task_id/shares", post(share_task).delete(remove_share))
        .route("/:task_id/sharing", put(update_sharing))
}

/// 解析当前用户对任务的权限
/// GET /api/internships/tasks/:task_id/permission
///
/// 无权限映射为 403, 未知任务映射为 404
async fn check_permission(
    State(state): State<Arc<AppState>>,
    RequireAuth(user): RequireAuth,
    Path(task_id): Path<String>,
    Query(query): Query<PermissionQuery>,
) -> Result<Json<ApiResponse<PermissionResult>>> {
    debug!("Permission check on task {} by {}", task_id, user.id);

    let permission = state
        .task_access_service
        .check_permission(
            &task_id,
            &user.id,
            user.kind,
            query.action.unwrap_or(TaskAction::View),
        )
        .await?
        .ok_or_else(|| AppError::forbidden("No permission on this task"))?;

    Ok(Json(ApiResponse::success(permission)))
}

/// 共享任务给指定用户
/// POST /api/internships/tasks/:task_id/shares
async fn share_task(
    State(state): State<Arc<AppState>>,
    RequireAuth(user): RequireAuth,
    Path(task_id): Path<String>,
    Json(request): Json<ShareTaskRequest>,
) -> Result<Json<ApiResponse<TaskShareGrant>>> {
    request.validate().map_err(AppError::ValidatorError)?;

    let grant = state
        .task_access_service
        .share_with_user(&user, &task_id, request)
        .await?;

    Ok(Json(ApiResponse::success(grant)))
}

/// 撤销共享
/// DELETE /api/internships/tasks/:task_id/shares
async fn remove_share(
    State(state): State<Arc<AppState>>,
    RequireAuth(user): RequireAuth,
    Path(task_id): Path<String>,
    Json(request): Json<RemoveShareRequest>,
) -> Result<Json<ApiResponse<()>>> {
    request.validate().map_err(AppError::ValidatorError)?;

    state
        .task_access_service
        .remove_share(&user, &task_id, request)
        .await?;

    Ok(Json(ApiResponse::success_with_message((), "Share removed".to_string())))
}

/// 更新任务可见性设置
/// PUT /api/internships/tasks/:task_id/sharing
async fn update_sharing(
    State(state): State<Arc<AppState>>,
    RequireAuth(user): RequireAuth,
    Path(task_id): Path<String>,
    Json(request): Json<UpdateSharingRequest>,
) -> Result<Json<ApiResponse<TaskSharingState>>> {
    let sharing = state
        .task_access_service
        .update_share_settings(&user, &task_id, request)
        .await?;

    Ok(Json(ApiResponse::success(sharing)))
}
