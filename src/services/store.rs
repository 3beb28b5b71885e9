//! 通知与共享状态的持久化契约
//!
//! 软删除过滤是每个查询的显式参数 (`DeletedFilter`), 不存在隐式改写
//! 查询的全局钩子。聚合路径 `increment_unread_group` 是一个原子的
//! "找到最近未读并递增": 内存实现在单把锁下完成, 不会出现并发重复;
//! 其它后端若无法提供原子条件更新, 允许出现可重复的竞态结果,
//! 这是契约中明确接受的行为。

use crate::{
    error::Result,
    models::{
        account::RecipientKind,
        notification::{DeletedFilter, Notification, NotificationQuery, NotificationType},
        task::{AccessType, TaskShareGrant, TaskSharingState},
    },
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;

/// 通知持久化接口
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// 插入一条通知, 返回存储后的记录
    async fn insert(&self, notification: Notification) -> Result<Notification>;

    async fn get(&self, id: &str) -> Result<Option<Notification>>;

    /// 按过滤条件查询, 创建时间降序, 分页
    async fn find(&self, query: &NotificationQuery) -> Result<Vec<Notification>>;

    async fn count(
        &self,
        recipient_id: &str,
        recipient_kind: RecipientKind,
        unread_only: bool,
        deleted: DeletedFilter,
    ) -> Result<u64>;

    /// 未读 -> 已读, 单调且幂等: 已读记录保持原样返回
    async fn mark_read(&self, id: &str) -> Result<Option<Notification>>;

    /// 将接收方的全部未读标记为已读, 返回受影响条数
    async fn mark_all_read(&self, recipient_id: &str, recipient_kind: RecipientKind) -> Result<u64>;

    /// 软删除 / 恢复
    async fn set_deleted(&self, id: &str, deleted: bool) -> Result<Option<Notification>>;

    /// 原子地找到分组键下最近一条未读通知并递增其聚合计数
    ///
    /// 找到则用 `render(new_count)` 重新渲染内容并返回更新后的记录;
    /// 没有匹配的未读通知时返回 None, 由调用方创建新记录
    async fn increment_unread_group(
        &self,
        recipient_id: &str,
        recipient_kind: RecipientKind,
        notification_type: NotificationType,
        group_id: &str,
        latest_actor_id: &str,
        render: &(dyn Fn(u64) -> Result<String> + Sync),
    ) -> Result<Option<Notification>>;
}

/// 内存通知存储: 单把锁保证聚合路径的原子性
#[derive(Default)]
pub struct MemoryNotificationStore {
    notifications: Mutex<Vec<Notification>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 测试辅助: 当前存储的记录总数 (包含软删除)
    pub fn len(&self) -> usize {
        self.notifications.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn deleted_matches(notification: &Notification, filter: DeletedFilter) -> bool {
    match filter {
        DeletedFilter::ActiveOnly => !notification.is_deleted,
        DeletedFilter::DeletedOnly => notification.is_deleted,
        DeletedFilter::Any => true,
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: Notification) -> Result<Notification> {
        let mut notifications = self.notifications.lock();
        notifications.push(notification.clone());
        Ok(notification)
    }

    async fn get(&self, id: &str) -> Result<Option<Notification>> {
        let notifications = self.notifications.lock();
        Ok(notifications.iter().find(|n| n.id == id).cloned())
    }

    async fn find(&self, query: &NotificationQuery) -> Result<Vec<Notification>> {
        let notifications = self.notifications.lock();
        let mut matched: Vec<Notification> = notifications
            .iter()
            .filter(|n| {
                n.recipient_id == query.recipient_id
                    && n.recipient_kind == query.recipient_kind
                    && deleted_matches(n, query.deleted)
                    && (!query.unread_only || !n.is_read)
                    && query
                        .notification_type
                        .map_or(true, |t| n.notification_type == t)
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        // page 和 limit 来自查询串, 溢出时饱和而不是回绕
        let offset = query
            .page
            .max(1)
            .saturating_sub(1)
            .saturating_mul(query.limit);
        Ok(matched.into_iter().skip(offset).take(query.limit).collect())
    }

    async fn count(
        &self,
        recipient_id: &str,
        recipient_kind: RecipientKind,
        unread_only: bool,
        deleted: DeletedFilter,
    ) -> Result<u64> {
        let notifications = self.notifications.lock();
        Ok(notifications
            .iter()
            .filter(|n| {
                n.recipient_id == recipient_id
                    && n.recipient_kind == recipient_kind
                    && deleted_matches(n, deleted)
                    && (!unread_only || !n.is_read)
            })
            .count() as u64)
    }

    async fn mark_read(&self, id: &str) -> Result<Option<Notification>> {
        let mut notifications = self.notifications.lock();
        Ok(notifications.iter_mut().find(|n| n.id == id).map(|n| {
            if !n.is_read {
                n.is_read = true;
                n.read_at = Some(Utc::now());
            }
            n.clone()
        }))
    }

    async fn mark_all_read(&self, recipient_id: &str, recipient_kind: RecipientKind) -> Result<u64> {
        let mut notifications = self.notifications.lock();
        let now = Utc::now();
        let mut updated = 0;
        for n in notifications.iter_mut() {
            if n.recipient_id == recipient_id
                && n.recipient_kind == recipient_kind
                && !n.is_read
                && !n.is_deleted
            {
                n.is_read = true;
                n.read_at = Some(now);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn set_deleted(&self, id: &str, deleted: bool) -> Result<Option<Notification>> {
        let mut notifications = self.notifications.lock();
        Ok(notifications.iter_mut().find(|n| n.id == id).map(|n| {
            n.is_deleted = deleted;
            n.clone()
        }))
    }

    async fn increment_unread_group(
        &self,
        recipient_id: &str,
        recipient_kind: RecipientKind,
        notification_type: NotificationType,
        group_id: &str,
        latest_actor_id: &str,
        render: &(dyn Fn(u64) -> Result<String> + Sync),
    ) -> Result<Option<Notification>> {
        let mut notifications = self.notifications.lock();

        // 最近一条匹配的未读通知
        let candidate = notifications
            .iter_mut()
            .filter(|n| {
                n.recipient_id == recipient_id
                    && n.recipient_kind == recipient_kind
                    && n.notification_type == notification_type
                    && !n.is_read
                    && !n.is_deleted
                    && n.related_data
                        .as_ref()
                        .and_then(|d| d.get("group_id"))
                        .and_then(|g| g.as_str())
                        == Some(group_id)
            })
            .max_by_key(|n| n.created_at);

        let Some(existing) = candidate else {
            return Ok(None);
        };

        let new_count = existing.group_count() + 1;
        // 先渲染再写入, 渲染失败时记录保持不变
        let content = render(new_count)?;

        existing.content = content;
        if let Some(data) = existing.related_data.as_mut() {
            data["count"] = serde_json::json!(new_count);
            data["latest_actor_id"] = serde_json::json!(latest_actor_id);
        }
        Ok(Some(existing.clone()))
    }
}

/// 任务共享状态的持久化接口
#[async_trait]
pub trait SharingStore: Send + Sync {
    /// 任务当前的共享状态, 未记录过的任务返回默认 (私有, view)
    async fn sharing_state(&self, task_id: &str) -> Result<TaskSharingState>;

    /// 新增或更新单用户授权
    async fn upsert_grant(&self, grant: TaskShareGrant) -> Result<()>;

    /// 移除授权, 返回是否确实存在
    async fn remove_grant(
        &self,
        task_id: &str,
        grantee_id: &str,
        grantee_kind: RecipientKind,
    ) -> Result<bool>;

    /// 更新可见性设置, 返回更新后的状态; 不触碰既有授权
    async fn set_visibility(
        &self,
        task_id: &str,
        is_public: Option<bool>,
        default_access: Option<AccessType>,
    ) -> Result<TaskSharingState>;
}

/// 内存共享状态存储
#[derive(Default)]
pub struct MemorySharingStore {
    states: DashMap<String, TaskSharingState>,
}

impl MemorySharingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharingStore for MemorySharingStore {
    async fn sharing_state(&self, task_id: &str) -> Result<TaskSharingState> {
        Ok(self
            .states
            .get(task_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn upsert_grant(&self, grant: TaskShareGrant) -> Result<()> {
        let mut state = self.states.entry(grant.task_id.clone()).or_default();
        if let Some(existing) = state
            .grants
            .iter_mut()
            .find(|g| g.grantee_id == grant.grantee_id && g.grantee_kind == grant.grantee_kind)
        {
            existing.access_type = grant.access_type;
        } else {
            state.grants.push(grant);
        }
        Ok(())
    }

    async fn remove_grant(
        &self,
        task_id: &str,
        grantee_id: &str,
        grantee_kind: RecipientKind,
    ) -> Result<bool> {
        let Some(mut state) = self.states.get_mut(task_id) else {
            return Ok(false);
        };
        let before = state.grants.len();
        state
            .grants
            .retain(|g| !(g.grantee_id == grantee_id && g.grantee_kind == grantee_kind));
        Ok(state.grants.len() < before)
    }

    async fn set_visibility(
        &self,
        task_id: &str,
        is_public: Option<bool>,
        default_access: Option<AccessType>,
    ) -> Result<TaskSharingState> {
        let mut state = self.states.entry(task_id.to_string()).or_default();
        if let Some(public) = is_public {
            state.is_public = public;
        }
        if let Some(access) = default_access {
            state.default_access = access;
        }
        Ok(state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::account::RecipientKind;
    use serde_json::json;

    fn sample(id: &str, recipient: &str, read: bool, deleted: bool) -> Notification {
        Notification {
            id: id.to_string(),
            recipient_id: recipient.to_string(),
            recipient_kind: RecipientKind::Student,
            recipient_role: None,
            notification_type: NotificationType::System,
            content: "content".to_string(),
            related_id: None,
            related_data: None,
            is_read: read,
            read_at: None,
            is_deleted: deleted,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_deleted_filter_is_explicit() {
        let store = MemoryNotificationStore::new();
        store.insert(sample("n1", "s1", false, false)).await.unwrap();
        store.insert(sample("n2", "s1", false, true)).await.unwrap();

        let base = NotificationQuery {
            recipient_id: "s1".to_string(),
            recipient_kind: RecipientKind::Student,
            deleted: DeletedFilter::ActiveOnly,
            unread_only: false,
            notification_type: None,
            page: 1,
            limit: 20,
        };

        assert_eq!(store.find(&base).await.unwrap().len(), 1);

        let deleted_only = NotificationQuery { deleted: DeletedFilter::DeletedOnly, ..base.clone() };
        assert_eq!(store.find(&deleted_only).await.unwrap().len(), 1);

        let any = NotificationQuery { deleted: DeletedFilter::Any, ..base };
        assert_eq!(store.find(&any).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_find_tolerates_extreme_page_numbers() {
        let store = MemoryNotificationStore::new();
        store.insert(sample("n1", "s1", false, false)).await.unwrap();

        let base = NotificationQuery {
            recipient_id: "s1".to_string(),
            recipient_kind: RecipientKind::Student,
            deleted: DeletedFilter::ActiveOnly,
            unread_only: false,
            notification_type: None,
            page: usize::MAX,
            limit: 100,
        };

        // 偏移量饱和而不是溢出, 超界的页码返回空页
        assert!(store.find(&base).await.unwrap().is_empty());

        // page 0 视为第一页
        let first = NotificationQuery { page: 0, ..base };
        assert_eq!(store.find(&first).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_is_monotonic_and_idempotent() {
        let store = MemoryNotificationStore::new();
        store.insert(sample("n1", "s1", false, false)).await.unwrap();

        let first = store.mark_read("n1").await.unwrap().unwrap();
        assert!(first.is_read);
        let read_at = first.read_at.unwrap();

        // 第二次调用不报错, 也不改变 read_at
        let second = store.mark_read("n1").await.unwrap().unwrap();
        assert!(second.is_read);
        assert_eq!(second.read_at.unwrap(), read_at);
    }

    #[tokio::test]
    async fn test_increment_unread_group_skips_read_rows() {
        let store = MemoryNotificationStore::new();
        let mut n = sample("n1", "s1", false, false);
        n.related_data = Some(json!({"group_id": "school_1", "count": 1, "latest_actor_id": "stu_1"}));
        store.insert(n).await.unwrap();
        store.mark_read("n1").await.unwrap();

        let render = |count: u64| -> Result<String> { Ok(format!("{} students joined", count)) };
        let bumped = store
            .increment_unread_group(
                "s1",
                RecipientKind::Student,
                NotificationType::System,
                "school_1",
                "stu_2",
                &render,
            )
            .await
            .unwrap();
        // 已读的聚合通知不再吸收新事件
        assert!(bumped.is_none());
    }

    #[tokio::test]
    async fn test_increment_unread_group_bumps_count() {
        let store = MemoryNotificationStore::new();
        let mut n = sample("n1", "s1", false, false);
        n.related_data = Some(json!({"group_id": "school_1", "count": 1, "latest_actor_id": "stu_1"}));
        store.insert(n).await.unwrap();

        let render = |count: u64| -> Result<String> { Ok(format!("{} students joined", count)) };
        let bumped = store
            .increment_unread_group(
                "s1",
                RecipientKind::Student,
                NotificationType::System,
                "school_1",
                "stu_2",
                &render,
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(bumped.group_count(), 2);
        assert_eq!(bumped.content, "2 students joined");
        assert_eq!(
            bumped.related_data.unwrap()["latest_actor_id"],
            "stu_2"
        );
        // 没有创建新行
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sharing_grants_survive_visibility_toggle() {
        let store = MemorySharingStore::new();
        store
            .upsert_grant(TaskShareGrant {
                task_id: "task_1".to_string(),
                grantee_id: "stu_1".to_string(),
                grantee_kind: RecipientKind::Student,
                access_type: AccessType::Edit,
            })
            .await
            .unwrap();

        let public = store
            .set_visibility("task_1", Some(true), Some(AccessType::View))
            .await
            .unwrap();
        assert!(public.is_public);
        assert_eq!(public.grants.len(), 1);

        let private = store.set_visibility("task_1", Some(false), None).await.unwrap();
        assert!(!private.is_public);
        assert_eq!(private.grants.len(), 1);
    }
}
