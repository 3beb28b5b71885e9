//! 通知扇出引擎
//!
//! 领域事件在这里变成持久化 + 实时推送的通知。持久化是唯一的投递
//! 保证: 写入失败向调用方传播, 推送失败只记录日志。同一次调用内
//! 先写库后推流, 客户端收到推送后总能立刻查到对应记录。

use crate::{
    error::{AppError, Result},
    models::{
        account::{RecipientKind, RecipientRole},
        notification::{
            BatchFailure, BatchNotifyResult, CreateNotificationRequest, DeletedFilter,
            GroupNotifyRequest, Notification, NotificationContent, NotificationQuery,
        },
    },
    services::{
        composer,
        directory::RecipientDirectory,
        store::NotificationStore,
        stream::NotificationStream,
    },
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    directory: Arc<dyn RecipientDirectory>,
    stream: NotificationStream,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        directory: Arc<dyn RecipientDirectory>,
        stream: NotificationStream,
    ) -> Self {
        Self {
            store,
            directory,
            stream,
        }
    }

    /// 创建并投递一条通知
    ///
    /// 恰好一条新存储记录, 至多一次流推送; 推送从不阻塞调用方的成败
    pub async fn notify(&self, request: CreateNotificationRequest) -> Result<Notification> {
        debug!(
            "Creating notification for {} ({})",
            request.recipient_id, request.recipient_kind
        );

        self.ensure_resolvable(&request.recipient_id, request.recipient_kind)
            .await?;
        validate_role(request.recipient_kind, &request.recipient_role)?;

        // 内容生成先于任何持久化尝试
        let content = match &request.content {
            NotificationContent::Raw(text) => ammonia::clean_text(text),
            NotificationContent::Template { key, params } => composer::compose(key, params)?,
        };

        let notification = Notification {
            id: format!("ntf_{}", Uuid::new_v4()),
            recipient_id: request.recipient_id,
            recipient_kind: request.recipient_kind,
            recipient_role: request.recipient_role,
            notification_type: request.notification_type,
            content,
            related_id: request.related_id,
            related_data: request.related_data,
            is_read: false,
            read_at: None,
            is_deleted: false,
            created_at: Utc::now(),
        };

        let stored = self.store.insert(notification).await?;
        self.push(&stored);
        Ok(stored)
    }

    /// 批量投递: 每条独立成败, 单条失败不放弃整批
    pub async fn notify_many(
        &self,
        requests: Vec<CreateNotificationRequest>,
    ) -> Result<BatchNotifyResult> {
        let mut delivered = Vec::new();
        let mut failed = Vec::new();

        for (index, request) in requests.into_iter().enumerate() {
            let recipient_id = request.recipient_id.clone();
            match self.notify(request).await {
                Ok(notification) => delivered.push(notification),
                Err(e) => {
                    warn!("Batch notification {} to {} failed: {}", index, recipient_id, e);
                    failed.push(BatchFailure {
                        index,
                        recipient_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(BatchNotifyResult { delivered, failed })
    }

    /// 聚合投递: 分组键下已有未读通知时递增其计数并重渲染,
    /// 否则创建 count = 1 的新通知
    pub async fn notify_or_group(&self, request: GroupNotifyRequest) -> Result<Notification> {
        self.ensure_resolvable(&request.recipient_id, request.recipient_kind)
            .await?;
        validate_role(request.recipient_kind, &request.recipient_role)?;

        let template_key = request.template_key.clone();
        let actor_name = request.actor_name.clone();
        let render = move |count: u64| {
            composer::compose(
                &template_key,
                &json!({"actor_name": actor_name, "count": count}),
            )
        };

        if let Some(updated) = self
            .store
            .increment_unread_group(
                &request.recipient_id,
                request.recipient_kind,
                request.notification_type,
                &request.group_id,
                &request.actor_id,
                &render,
            )
            .await?
        {
            debug!(
                "Grouped notification {} bumped to count {}",
                updated.id,
                updated.group_count()
            );
            self.push(&updated);
            return Ok(updated);
        }

        let content = render(1)?;
        let notification = Notification {
            id: format!("ntf_{}", Uuid::new_v4()),
            recipient_id: request.recipient_id,
            recipient_kind: request.recipient_kind,
            recipient_role: request.recipient_role,
            notification_type: request.notification_type,
            content,
            related_id: None,
            related_data: Some(json!({
                "group_id": request.group_id,
                "count": 1,
                "latest_actor_id": request.actor_id,
            })),
            is_read: false,
            read_at: None,
            is_deleted: false,
            created_at: Utc::now(),
        };

        let stored = self.store.insert(notification).await?;
        self.push(&stored);
        Ok(stored)
    }

    /// 接收方的通知列表
    pub async fn list(&self, query: NotificationQuery) -> Result<Vec<Notification>> {
        self.store.find(&query).await
    }

    /// 未读条数 (活动记录)
    pub async fn unread_count(&self, recipient_id: &str, kind: RecipientKind) -> Result<u64> {
        self.store
            .count(recipient_id, kind, true, DeletedFilter::ActiveOnly)
            .await
    }

    /// 标记已读 (幂等; 重复调用不是错误)
    pub async fn mark_read(
        &self,
        recipient_id: &str,
        kind: RecipientKind,
        notification_id: &str,
    ) -> Result<Notification> {
        self.owned_notification(recipient_id, kind, notification_id)
            .await?;
        self.store
            .mark_read(notification_id)
            .await?
            .ok_or_else(|| AppError::not_found("Notification"))
    }

    /// 全部标记已读, 返回受影响条数
    pub async fn mark_all_read(&self, recipient_id: &str, kind: RecipientKind) -> Result<u64> {
        self.store.mark_all_read(recipient_id, kind).await
    }

    /// 软删除
    pub async fn delete(
        &self,
        recipient_id: &str,
        kind: RecipientKind,
        notification_id: &str,
    ) -> Result<Notification> {
        self.owned_notification(recipient_id, kind, notification_id)
            .await?;
        self.store
            .set_deleted(notification_id, true)
            .await?
            .ok_or_else(|| AppError::not_found("Notification"))
    }

    /// 恢复软删除的通知
    pub async fn restore(
        &self,
        recipient_id: &str,
        kind: RecipientKind,
        notification_id: &str,
    ) -> Result<Notification> {
        self.owned_notification(recipient_id, kind, notification_id)
            .await?;
        self.store
            .set_deleted(notification_id, false)
            .await?
            .ok_or_else(|| AppError::not_found("Notification"))
    }

    async fn ensure_resolvable(&self, recipient_id: &str, kind: RecipientKind) -> Result<()> {
        if self.directory.resolve(recipient_id, kind).await?.is_none() {
            return Err(AppError::unknown_recipient(recipient_id, kind.as_str()));
        }
        Ok(())
    }

    /// 他人的通知对请求者表现为不存在
    async fn owned_notification(
        &self,
        recipient_id: &str,
        kind: RecipientKind,
        notification_id: &str,
    ) -> Result<Notification> {
        let notification = self
            .store
            .get(notification_id)
            .await?
            .ok_or_else(|| AppError::not_found("Notification"))?;
        if notification.recipient_id != recipient_id || notification.recipient_kind != kind {
            return Err(AppError::not_found("Notification"));
        }
        Ok(notification)
    }

    fn push(&self, notification: &Notification) {
        let delivered = self.stream.publish(notification);
        debug!(
            "Notification {} pushed to {} live subscriber(s)",
            notification.id, delivered
        );
    }
}

/// 角色限定不变量: 要求角色的账号类别必须携带对应类别的角色,
/// 其余类别必须不带角色
fn validate_role(kind: RecipientKind, role: &Option<RecipientRole>) -> Result<()> {
    match role {
        Some(role) if !kind.requires_role() => Err(AppError::Validation(format!(
            "recipient kind {} does not take a role, got {:?}",
            kind, role
        ))),
        Some(role) if !role.belongs_to(kind) => Err(AppError::Validation(format!(
            "role {:?} does not belong to recipient kind {}",
            role, kind
        ))),
        None if kind.requires_role() => Err(AppError::Validation(format!(
            "recipient kind {} requires a role for scoped delivery",
            kind
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            account::CompanyRole,
            notification::NotificationType,
        },
        services::{
            directory::{MemoryRecipientDirectory, ResolvedRecipient},
            store::MemoryNotificationStore,
        },
    };

    fn service() -> (NotificationService, Arc<MemoryNotificationStore>, NotificationStream) {
        let store = Arc::new(MemoryNotificationStore::new());
        let directory = Arc::new(MemoryRecipientDirectory::new());
        directory.insert(ResolvedRecipient {
            id: "stu_1".to_string(),
            kind: RecipientKind::Student,
            role: None,
            parent_group_id: Some("school_1".to_string()),
        });
        directory.insert(ResolvedRecipient {
            id: "school_acc_1".to_string(),
            kind: RecipientKind::SchoolAccount,
            role: Some(RecipientRole::School(crate::models::account::SchoolRole {
                name: "admin".to_string(),
                department: None,
                faculty: None,
            })),
            parent_group_id: Some("school_1".to_string()),
        });
        let stream = NotificationStream::new();
        let svc = NotificationService::new(store.clone(), directory, stream.clone());
        (svc, store, stream)
    }

    fn raw_request(recipient_id: &str, kind: RecipientKind) -> CreateNotificationRequest {
        CreateNotificationRequest {
            recipient_id: recipient_id.to_string(),
            recipient_kind: kind,
            recipient_role: None,
            notification_type: NotificationType::System,
            content: NotificationContent::Raw("hello".to_string()),
            related_id: None,
            related_data: None,
        }
    }

    fn school_group_request() -> GroupNotifyRequest {
        GroupNotifyRequest {
            recipient_id: "school_acc_1".to_string(),
            recipient_kind: RecipientKind::SchoolAccount,
            recipient_role: Some(RecipientRole::School(crate::models::account::SchoolRole {
                name: "admin".to_string(),
                department: None,
                faculty: None,
            })),
            notification_type: NotificationType::System,
            group_id: "school_1".to_string(),
            template_key: "school.student_joined".to_string(),
            actor_id: "stu_1".to_string(),
            actor_name: "Alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_notify_creates_unread_record() {
        let (svc, store, _) = service();
        let n = svc.notify(raw_request("stu_1", RecipientKind::Student)).await.unwrap();
        assert!(!n.is_read);
        assert!(!n.is_deleted);
        assert!(n.read_at.is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_recipient_persists_nothing() {
        let (svc, store, _) = service();
        let err = svc
            .notify(raw_request("ghost", RecipientKind::Student))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnknownRecipient(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_role_invariant_enforced() {
        let (svc, store, _) = service();

        // 学校账号缺少角色
        let mut request = raw_request("school_acc_1", RecipientKind::SchoolAccount);
        let err = svc.notify(request.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // 学生带了公司角色
        request = raw_request("stu_1", RecipientKind::Student);
        request.recipient_role = Some(RecipientRole::Company { role: CompanyRole::Mentor });
        let err = svc.notify(request).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_template_not_found_aborts_before_persistence() {
        let (svc, store, _) = service();
        let mut request = raw_request("stu_1", RecipientKind::Student);
        request.content = NotificationContent::Template {
            key: "task.no_such_event".to_string(),
            params: serde_json::json!({}),
        };
        let err = svc.notify(request).await.unwrap_err();
        assert!(matches!(err, AppError::TemplateNotFound(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_notify_many_reports_per_item_outcome() {
        let (svc, store, _) = service();
        let result = svc
            .notify_many(vec![
                raw_request("stu_1", RecipientKind::Student),
                raw_request("ghost", RecipientKind::Student),
                raw_request("stu_1", RecipientKind::Student),
            ])
            .await
            .unwrap();

        assert_eq!(result.delivered.len(), 2);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].index, 1);
        assert_eq!(result.failed[0].recipient_id, "ghost");
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_grouping_merges_until_read() {
        let (svc, store, _) = service();

        let first = svc.notify_or_group(school_group_request()).await.unwrap();
        assert_eq!(first.group_count(), 1);
        assert!(first.content.contains("just joined"));

        let mut second_request = school_group_request();
        second_request.actor_id = "stu_2".to_string();
        second_request.actor_name = "Bob".to_string();
        let second = svc.notify_or_group(second_request).await.unwrap();

        // 同一行被递增, 不创建新行
        assert_eq!(second.id, first.id);
        assert_eq!(second.group_count(), 2);
        assert!(second.content.contains("and 1 others"));
        assert_eq!(
            second.related_data.as_ref().unwrap()["latest_actor_id"],
            "stu_2"
        );
        assert_eq!(store.len(), 1);

        // 读过之后, 新事件开启新的聚合行
        svc.mark_read("school_acc_1", RecipientKind::SchoolAccount, &first.id)
            .await
            .unwrap();
        let third = svc.notify_or_group(school_group_request()).await.unwrap();
        assert_ne!(third.id, first.id);
        assert_eq!(third.group_count(), 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let (svc, _, _) = service();
        let n = svc.notify(raw_request("stu_1", RecipientKind::Student)).await.unwrap();

        let first = svc
            .mark_read("stu_1", RecipientKind::Student, &n.id)
            .await
            .unwrap();
        let second = svc
            .mark_read("stu_1", RecipientKind::Student, &n.id)
            .await
            .unwrap();
        assert!(first.is_read && second.is_read);
        assert_eq!(first.read_at, second.read_at);
    }

    #[tokio::test]
    async fn test_foreign_notification_looks_missing() {
        let (svc, _, _) = service();
        let n = svc.notify(raw_request("stu_1", RecipientKind::Student)).await.unwrap();

        let err = svc
            .mark_read("school_acc_1", RecipientKind::SchoolAccount, &n.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_and_restore_roundtrip() {
        let (svc, _, _) = service();
        let n = svc.notify(raw_request("stu_1", RecipientKind::Student)).await.unwrap();

        let deleted = svc
            .delete("stu_1", RecipientKind::Student, &n.id)
            .await
            .unwrap();
        assert!(deleted.is_deleted);
        assert_eq!(svc.unread_count("stu_1", RecipientKind::Student).await.unwrap(), 0);

        let restored = svc
            .restore("stu_1", RecipientKind::Student, &n.id)
            .await
            .unwrap();
        assert!(!restored.is_deleted);
        // 恢复不触碰读状态
        assert!(!restored.is_read);
        assert_eq!(svc.unread_count("stu_1", RecipientKind::Student).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_persisted_before_streamed() {
        let (svc, store, stream) = service();
        let mut sub = stream.subscribe("stu_1", RecipientKind::Student, None);

        let n = svc.notify(raw_request("stu_1", RecipientKind::Student)).await.unwrap();

        let pushed = sub.receiver.try_recv().unwrap();
        assert_eq!(pushed.id, n.id);
        // 收到推送的客户端总能立刻查到存储记录
        assert!(store.get(&pushed.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_raw_content_is_escaped() {
        let (svc, _, _) = service();
        let mut request = raw_request("stu_1", RecipientKind::Student);
        request.content = NotificationContent::Raw("<b>bold</b>".to_string());
        let n = svc.notify(request).await.unwrap();
        assert!(!n.content.contains("<b>"));
    }
}
