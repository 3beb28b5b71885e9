//! 任务访问控制引擎
//!
//! 对 (用户, 任务, 动作) 三元组解析权限: 所属导师 > 公开可见性 >
//! 单用户授权 > 无权限。共享管理动作要求调用方自身解析出
//! can_manage_sharing, 授权对象的资格在授予时刻重新校验, 不信任
//! 上游检查。权限变更通过扇出引擎通知受影响方。

use crate::{
    error::{AppError, Result},
    models::{
        account::{AuthUser, RecipientKind, RecipientRole},
        notification::{CreateNotificationRequest, NotificationContent, NotificationType},
        task::{
            PermissionResult, RemoveShareRequest, ShareTaskRequest, TaskAction, TaskContext,
            TaskShareGrant, TaskSharingState, UpdateSharingRequest,
        },
    },
    services::{
        directory::{RecipientDirectory, TaskDirectory},
        fanout::NotificationService,
        store::SharingStore,
    },
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct TaskAccessService {
    tasks: Arc<dyn TaskDirectory>,
    recipients: Arc<dyn RecipientDirectory>,
    sharing: Arc<dyn SharingStore>,
    notifications: NotificationService,
}

impl TaskAccessService {
    pub fn new(
        tasks: Arc<dyn TaskDirectory>,
        recipients: Arc<dyn RecipientDirectory>,
        sharing: Arc<dyn SharingStore>,
        notifications: NotificationService,
    ) -> Self {
        Self {
            tasks,
            recipients,
            sharing,
            notifications,
        }
    }

    /// 解析用户对任务的权限; 无权限时返回 None (边界映射为 403),
    /// 未知任务报错 (映射为 404), 与内部故障可区分
    pub async fn check_permission(
        &self,
        task_id: &str,
        user_id: &str,
        user_kind: RecipientKind,
        action: TaskAction,
    ) -> Result<Option<PermissionResult>> {
        let context = self.task(task_id).await?;
        let state = self.sharing.sharing_state(task_id).await?;

        let resolved = self.resolve(&context, &state, user_id, user_kind).await?;
        Ok(resolved.filter(|p| p.satisfies(action)))
    }

    /// 授予单用户访问权
    pub async fn share_with_user(
        &self,
        caller: &AuthUser,
        task_id: &str,
        request: ShareTaskRequest,
    ) -> Result<TaskShareGrant> {
        let context = self.task(task_id).await?;
        self.require_sharing_manager(&context, caller).await?;

        // 授予时刻重新校验资格
        self.ensure_eligible(&context, &request.grantee_id, request.grantee_kind)
            .await?;

        // 接收方必须在写入授权之前可解析, 失败时不留下任何授权
        let grantee_role = self
            .resolve_grantee_role(&request.grantee_id, request.grantee_kind)
            .await?;

        let grant = TaskShareGrant {
            task_id: task_id.to_string(),
            grantee_id: request.grantee_id.clone(),
            grantee_kind: request.grantee_kind,
            access_type: request.access_type,
        };
        self.sharing.upsert_grant(grant.clone()).await?;
        info!(
            "Task {} shared with {} ({}) as {}",
            task_id,
            request.grantee_id,
            request.grantee_kind,
            request.access_type.as_str()
        );

        self.notify_grantee(
            &context,
            &request.grantee_id,
            request.grantee_kind,
            grantee_role,
            "task.shared",
            json!({
                "actor_name": caller.id,
                "task_name": context.task_name,
                "access": request.access_type.as_str(),
            }),
        )
        .await?;

        Ok(grant)
    }

    /// 撤销单用户访问权
    pub async fn remove_share(
        &self,
        caller: &AuthUser,
        task_id: &str,
        request: RemoveShareRequest,
    ) -> Result<()> {
        let context = self.task(task_id).await?;
        self.require_sharing_manager(&context, caller).await?;

        let grantee_role = self
            .resolve_grantee_role(&request.grantee_id, request.grantee_kind)
            .await?;

        let removed = self
            .sharing
            .remove_grant(task_id, &request.grantee_id, request.grantee_kind)
            .await?;
        if !removed {
            return Err(AppError::not_found("Share grant"));
        }
        info!("Task {} share removed for {}", task_id, request.grantee_id);

        self.notify_grantee(
            &context,
            &request.grantee_id,
            request.grantee_kind,
            grantee_role,
            "task.share_removed",
            json!({"task_name": context.task_name}),
        )
        .await?;

        Ok(())
    }

    /// 更新任务可见性设置
    ///
    /// 私有切公开不会删除既有授权 (它们休眠, 切回私有后重新生效);
    /// 变为公开时向所有项目成员扇出告知默认访问级别
    pub async fn update_share_settings(
        &self,
        caller: &AuthUser,
        task_id: &str,
        request: UpdateSharingRequest,
    ) -> Result<TaskSharingState> {
        let context = self.task(task_id).await?;
        self.require_sharing_manager(&context, caller).await?;

        let before = self.sharing.sharing_state(task_id).await?;
        let state = self
            .sharing
            .set_visibility(task_id, request.is_public, request.default_access)
            .await?;

        if !before.is_public && state.is_public {
            info!(
                "Task {} made public with {} access for {} member(s)",
                task_id,
                state.default_access.as_str(),
                context.selected_applicants.len()
            );
            let requests = context
                .selected_applicants
                .iter()
                .map(|student_id| CreateNotificationRequest {
                    recipient_id: student_id.clone(),
                    recipient_kind: RecipientKind::Student,
                    recipient_role: None,
                    notification_type: NotificationType::Task,
                    content: NotificationContent::Template {
                        key: "task.made_public".to_string(),
                        params: json!({
                            "task_name": context.task_name,
                            "access": state.default_access.as_str(),
                        }),
                    },
                    related_id: Some(task_id.to_string()),
                    related_data: None,
                })
                .collect();
            // 每个成员独立成败, 失败已在批量结果中记录
            let outcome = self.notifications.notify_many(requests).await?;
            debug!(
                "Task {} visibility fan-out: {} delivered, {} failed",
                task_id,
                outcome.delivered.len(),
                outcome.failed.len()
            );
        }

        Ok(state)
    }

    // ---- 解析与校验 ----

    async fn task(&self, task_id: &str) -> Result<TaskContext> {
        self.tasks
            .task_context(task_id)
            .await?
            .ok_or_else(|| AppError::not_found("Task"))
    }

    /// 权限解析顺序: 所属导师 -> 公开 + 项目成员 -> 单用户授权 -> 无
    async fn resolve(
        &self,
        context: &TaskContext,
        state: &TaskSharingState,
        user_id: &str,
        user_kind: RecipientKind,
    ) -> Result<Option<PermissionResult>> {
        if user_kind == RecipientKind::CompanyAccount && user_id == context.mentor_account_id {
            return Ok(Some(PermissionResult::admin()));
        }

        if state.is_public && self.is_project_member(context, user_id, user_kind).await? {
            return Ok(Some(PermissionResult::from_access(state.default_access)));
        }

        if let Some(grant) = state.grant_for(user_id, user_kind) {
            return Ok(Some(PermissionResult::from_access(grant.access_type)));
        }

        Ok(None)
    }

    /// 项目成员: 已录取的学生, 或同公司的公司账号
    async fn is_project_member(
        &self,
        context: &TaskContext,
        user_id: &str,
        user_kind: RecipientKind,
    ) -> Result<bool> {
        match user_kind {
            RecipientKind::Student => Ok(context.is_selected_applicant(user_id)),
            RecipientKind::CompanyAccount => {
                let resolved = self
                    .recipients
                    .resolve(user_id, RecipientKind::CompanyAccount)
                    .await?;
                Ok(resolved
                    .and_then(|r| r.parent_group_id)
                    .map_or(false, |company| company == context.company_id))
            }
            _ => Ok(false),
        }
    }

    async fn require_sharing_manager(
        &self,
        context: &TaskContext,
        caller: &AuthUser,
    ) -> Result<PermissionResult> {
        let state = self.sharing.sharing_state(&context.task_id).await?;
        match self
            .resolve(context, &state, &caller.id, caller.kind)
            .await?
        {
            Some(permission) if permission.can_manage_sharing => Ok(permission),
            _ => Err(AppError::forbidden(
                "Managing task sharing requires admin permission on the task",
            )),
        }
    }

    /// 资格校验: 学生必须是项目已录取成员, 公司账号必须属于同一公司
    async fn ensure_eligible(
        &self,
        context: &TaskContext,
        grantee_id: &str,
        grantee_kind: RecipientKind,
    ) -> Result<()> {
        let eligible = self
            .is_project_member(context, grantee_id, grantee_kind)
            .await?;
        if !eligible {
            return Err(AppError::IneligibleGrantee(format!(
                "{} ({}) is not eligible for task {}",
                grantee_id, grantee_kind, context.task_id
            )));
        }
        Ok(())
    }

    /// 公司账号的通知需要角色限定, 由调用方在任何状态变更之前从目录解析
    async fn resolve_grantee_role(
        &self,
        grantee_id: &str,
        grantee_kind: RecipientKind,
    ) -> Result<Option<RecipientRole>> {
        match self.recipients.resolve(grantee_id, grantee_kind).await? {
            Some(resolved) => Ok(resolved.role),
            None => Err(AppError::unknown_recipient(grantee_id, grantee_kind.as_str())),
        }
    }

    async fn notify_grantee(
        &self,
        context: &TaskContext,
        grantee_id: &str,
        grantee_kind: RecipientKind,
        role: Option<RecipientRole>,
        template_key: &str,
        params: serde_json::Value,
    ) -> Result<()> {
        self.notifications
            .notify(CreateNotificationRequest {
                recipient_id: grantee_id.to_string(),
                recipient_kind: grantee_kind,
                recipient_role: role,
                notification_type: NotificationType::Task,
                content: NotificationContent::Template {
                    key: template_key.to_string(),
                    params,
                },
                related_id: Some(context.task_id.clone()),
                related_data: None,
            })
            .await?;
        Ok(())
    }
}
