use crate::{
    error::Result,
    models::{
        account::AuthUser,
        notification::{unread_badge, DeletedFilter, NotificationQuery, NotificationType},
        stream::{StreamMessage, StreamMessageType},
    },
    state::AppState,
    utils::middleware::RequireAuth,
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{Json, Response},
    routing::{delete, get, put},
    Router,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct NotificationListQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub unread_only: Option<bool>,
    /// 默认只返回活动记录; 恢复列表显式请求 deleted_only
    pub deleted: Option<DeletedFilter>,
    #[serde(rename = "type")]
    pub notification_type: Option<NotificationType>,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/unread-count", get(get_unread_count))
        .route("/read-all", put(mark_all_read))
        .route("/:notification_id/read", put(mark_read))
        .route("/:notification_id", delete(delete_notification))
        .route("/:notification_id/restore", put(restore_notification))
        .route("/stream", get(stream_handler))
}

/// 通知列表 (分页, 创建时间降序)
/// GET /api/internships/notifications
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    RequireAuth(user): RequireAuth,
    Query(query): Query<NotificationListQuery>,
) -> Result<Json<Value>> {
    debug!("Listing notifications for {}", user.id);

    let limit = query
        .limit
        .unwrap_or(state.config.default_notifications_per_page)
        .min(state.config.max_notifications_per_page);

    let notifications = state
        .notification_service
        .list(NotificationQuery {
            recipient_id: user.id.clone(),
            recipient_kind: user.kind,
            deleted: query.deleted.unwrap_or(DeletedFilter::ActiveOnly),
            unread_only: query.unread_only.unwrap_or(false),
            notification_type: query.notification_type,
            page: query.page.unwrap_or(1),
            limit,
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": notifications
    })))
}

/// 未读角标 (超过 99 显示 "99+")
/// GET /api/internships/notifications/unread-count
async fn get_unread_count(
    State(state): State<Arc<AppState>>,
    RequireAuth(user): RequireAuth,
) -> Result<Json<Value>> {
    let count = state
        .notification_service
        .unread_count(&user.id, user.kind)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "count": count,
            "badge": unread_badge(count)
        }
    })))
}

/// 标记单条已读 (幂等)
/// PUT /api/internships/notifications/:id/read
async fn mark_read(
    State(state): State<Arc<AppState>>,
    RequireAuth(user): RequireAuth,
    Path(notification_id): Path<String>,
) -> Result<Json<Value>> {
    let notification = state
        .notification_service
        .mark_read(&user.id, user.kind, &notification_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": notification
    })))
}

/// 全部标记已读
/// PUT /api/internships/notifications/read-all
async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    RequireAuth(user): RequireAuth,
) -> Result<Json<Value>> {
    let updated = state
        .notification_service
        .mark_all_read(&user.id, user.kind)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": { "updated": updated }
    })))
}

/// 软删除
/// DELETE /api/internships/notifications/:id
async fn delete_notification(
    State(state): State<Arc<AppState>>,
    RequireAuth(user): RequireAuth,
    Path(notification_id): Path<String>,
) -> Result<Json<Value>> {
    state
        .notification_service
        .delete(&user.id, user.kind, &notification_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Notification deleted"
    })))
}

/// 恢复软删除的通知
/// PUT /api/internships/notifications/:id/restore
async fn restore_notification(
    State(state): State<Arc<AppState>>,
    RequireAuth(user): RequireAuth,
    Path(notification_id): Path<String>,
) -> Result<Json<Value>> {
    let notification = state
        .notification_service
        .restore(&user.id, user.kind, &notification_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": notification
    })))
}

/// 实时通知流连接
/// GET /api/internships/notifications/stream
async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    RequireAuth(user): RequireAuth,
) -> Response {
    info!("Stream upgrade request from {} ({})", user.id, user.kind);
    ws.on_upgrade(move |socket| handle_stream_connection(socket, state, user))
}

/// 把流中心的订阅桥接到 WebSocket 连接
///
/// 连接关闭时订阅句柄随之释放并从注册表注销
async fn handle_stream_connection(socket: WebSocket, state: Arc<AppState>, user: AuthUser) {
    let mut subscription = state
        .notification_stream
        .subscribe(&user.id, user.kind, user.role.clone());

    let (mut ws_tx, mut ws_rx) = socket.split();

    let connect_msg = StreamMessage::connect(&user.id);
    if let Ok(text) = serde_json::to_string(&connect_msg) {
        if ws_tx.send(Message::Text(text)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            pushed = subscription.receiver.recv() => {
                let Some(notification) = pushed else { break };
                let message = StreamMessage::notification(&notification);
                match serde_json::to_string(&message) {
                    Ok(text) => {
                        if let Err(e) = ws_tx.send(Message::Text(text)).await {
                            warn!("Stream send to {} failed: {}", user.id, e);
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to serialize stream message: {}", e),
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(pong) = answer_client_ping(&text) {
                            if ws_tx.send(Message::Text(pong)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_tx.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Stream connection closed for {}", user.id);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Stream connection error for {}: {}", user.id, e);
                        break;
                    }
                }
            }
        }
    }
}

/// 应用层心跳: 客户端发来 ping 消息时回以携带其时间戳的 pong
fn answer_client_ping(text: &str) -> Option<String> {
    let message: StreamMessage = serde_json::from_str(text).ok()?;
    if message.message_type != StreamMessageType::Ping {
        return None;
    }

    let client_timestamp = message
        .data
        .get("timestamp")
        .and_then(|ts| ts.as_str())
        .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc));

    serde_json::to_string(&StreamMessage::pong(client_timestamp)).ok()
}
