use crate::models::account::{RecipientKind, RecipientRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 通知分类 (用于列表过滤和前端展示, 不参与路由)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Task,
    Project,
    System,
    Account,
    Survey,
}

/// 通知记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub recipient_kind: RecipientKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_role: Option<RecipientRole>,
    pub notification_type: NotificationType,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_data: Option<Value>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// 聚合数据中的计数, 缺失时视为 1
    pub fn group_count(&self) -> u64 {
        self.related_data
            .as_ref()
            .and_then(|d| d.get("count"))
            .and_then(|c| c.as_u64())
            .unwrap_or(1)
    }
}

/// 通知内容: 直接给出文本, 或引用模板目录中的一个事件键
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationContent {
    Raw(String),
    Template { key: String, params: Value },
}

/// 创建通知请求 (由领域事件层构造)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNotificationRequest {
    pub recipient_id: String,
    pub recipient_kind: RecipientKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_role: Option<RecipientRole>,
    pub notification_type: NotificationType,
    pub content: NotificationContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_data: Option<Value>,
}

/// 聚合通知请求: 同一分组键下的相似事件合并为一条未读通知
#[derive(Debug, Clone)]
pub struct GroupNotifyRequest {
    pub recipient_id: String,
    pub recipient_kind: RecipientKind,
    pub recipient_role: Option<RecipientRole>,
    pub notification_type: NotificationType,
    /// 分组键, 例如学校 id
    pub group_id: String,
    pub template_key: String,
    pub actor_id: String,
    pub actor_name: String,
}

/// 批量投递中单条通知的失败记录
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub index: usize,
    pub recipient_id: String,
    pub error: String,
}

/// 批量投递结果: 每条通知独立成败, 不因单条失败放弃整批
#[derive(Debug, Serialize)]
pub struct BatchNotifyResult {
    pub delivered: Vec<Notification>,
    pub failed: Vec<BatchFailure>,
}

/// 软删除过滤: 所有查询必须显式声明, 不依赖隐式的全局钩子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletedFilter {
    ActiveOnly,
    DeletedOnly,
    Any,
}

/// 通知列表查询
#[derive(Debug, Clone)]
pub struct NotificationQuery {
    pub recipient_id: String,
    pub recipient_kind: RecipientKind,
    pub deleted: DeletedFilter,
    pub unread_only: bool,
    pub notification_type: Option<NotificationType>,
    pub page: usize,
    pub limit: usize,
}

/// 未读计数上限展示为 "99+"
pub fn unread_badge(count: u64) -> String {
    if count > 99 {
        "99+".to_string()
    } else {
        count.to_string()
    }
}
