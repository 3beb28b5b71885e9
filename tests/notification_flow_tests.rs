//! 端到端流程测试: 领域事件 -> 扇出 -> 持久化 + 实时推送,
//! 以及任务共享的权限解析全链路

use internhub_core::{
    models::{
        account::{AuthUser, CompanyRole, RecipientKind, RecipientRole},
        notification::{
            CreateNotificationRequest, DeletedFilter, NotificationContent, NotificationQuery,
            NotificationType,
        },
        task::{AccessType, ShareTaskRequest, TaskAction, TaskContext, UpdateSharingRequest},
    },
    services::{
        access::TaskAccessService,
        directory::{MemoryRecipientDirectory, MemoryTaskDirectory, ResolvedRecipient},
        fanout::NotificationService,
        store::{MemoryNotificationStore, MemorySharingStore, NotificationStore},
        stream::NotificationStream,
    },
};
use serde_json::json;
use std::sync::Arc;

struct TestApp {
    notifications: NotificationService,
    access: TaskAccessService,
    stream: NotificationStream,
    store: Arc<MemoryNotificationStore>,
}

/// 公司 comp_1 的导师 mentor_1 在项目 proj_1 中布置任务 task_1,
/// 项目录取了学生 stu_1 和 stu_2
fn test_app() -> TestApp {
    let recipients = Arc::new(MemoryRecipientDirectory::new());
    recipients.insert(ResolvedRecipient {
        id: "mentor_1".to_string(),
        kind: RecipientKind::CompanyAccount,
        role: Some(RecipientRole::Company { role: CompanyRole::Mentor }),
        parent_group_id: Some("comp_1".to_string()),
    });
    for id in ["stu_1", "stu_2"] {
        recipients.insert(ResolvedRecipient {
            id: id.to_string(),
            kind: RecipientKind::Student,
            role: None,
            parent_group_id: Some("school_1".to_string()),
        });
    }

    let tasks = Arc::new(MemoryTaskDirectory::new());
    tasks.insert(TaskContext {
        task_id: "task_1".to_string(),
        task_name: "Build login".to_string(),
        project_id: "proj_1".to_string(),
        project_title: "Intern portal".to_string(),
        mentor_account_id: "mentor_1".to_string(),
        company_id: "comp_1".to_string(),
        assigned_student_id: Some("stu_1".to_string()),
        selected_applicants: vec!["stu_1".to_string(), "stu_2".to_string()],
    });

    let store = Arc::new(MemoryNotificationStore::new());
    let stream = NotificationStream::new();
    let notifications =
        NotificationService::new(store.clone(), recipients.clone(), stream.clone());
    let access = TaskAccessService::new(
        tasks,
        recipients,
        Arc::new(MemorySharingStore::new()),
        notifications.clone(),
    );

    TestApp {
        notifications,
        access,
        stream,
        store,
    }
}

fn mentor() -> AuthUser {
    AuthUser {
        id: "mentor_1".to_string(),
        kind: RecipientKind::CompanyAccount,
        role: Some(RecipientRole::Company { role: CompanyRole::Mentor }),
    }
}

#[tokio::test]
async fn task_assignment_reaches_store_and_live_stream() {
    let app = test_app();
    let mut subscription = app.stream.subscribe("stu_1", RecipientKind::Student, None);

    let notification = app
        .notifications
        .notify(CreateNotificationRequest {
            recipient_id: "stu_1".to_string(),
            recipient_kind: RecipientKind::Student,
            recipient_role: None,
            notification_type: NotificationType::Task,
            content: NotificationContent::Template {
                key: "task.assigned".to_string(),
                params: json!({"task_name": "Build login"}),
            },
            related_id: Some("task_1".to_string()),
            related_data: None,
        })
        .await
        .unwrap();

    assert_eq!(
        notification.content,
        "You have been assigned a new task: **Build login**"
    );
    assert!(!notification.is_read);

    // 推送在持久化之后到达, 客户端能立刻回查到记录
    let pushed = subscription.receiver.try_recv().unwrap();
    assert_eq!(pushed.id, notification.id);
    assert!(app.store.get(&pushed.id).await.unwrap().is_some());

    assert_eq!(
        app.notifications
            .unread_count("stu_1", RecipientKind::Student)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn sharing_lifecycle_resolves_permissions_as_specified() {
    let app = test_app();

    // 授权前: 私有任务对已录取学生也不可编辑
    assert!(app
        .access
        .check_permission("task_1", "stu_1", RecipientKind::Student, TaskAction::Edit)
        .await
        .unwrap()
        .is_none());

    // 导师授予 edit
    app.access
        .share_with_user(
            &mentor(),
            "task_1",
            ShareTaskRequest {
                grantee_id: "stu_1".to_string(),
                grantee_kind: RecipientKind::Student,
                access_type: AccessType::Edit,
            },
        )
        .await
        .unwrap();

    let permission = app
        .access
        .check_permission("task_1", "stu_1", RecipientKind::Student, TaskAction::Edit)
        .await
        .unwrap()
        .unwrap();
    assert!(permission.can_add_files);
    assert!(!permission.can_manage_sharing);

    // 导师无论授权状态如何都是完整权限
    let permission = app
        .access
        .check_permission(
            "task_1",
            "mentor_1",
            RecipientKind::CompanyAccount,
            TaskAction::Admin,
        )
        .await
        .unwrap()
        .unwrap();
    assert!(permission.can_manage_sharing);
}

#[tokio::test]
async fn make_public_fans_out_to_every_member() {
    let app = test_app();

    app.access
        .update_share_settings(
            &mentor(),
            "task_1",
            UpdateSharingRequest {
                is_public: Some(true),
                default_access: Some(AccessType::Edit),
            },
        )
        .await
        .unwrap();

    for student in ["stu_1", "stu_2"] {
        let list = app
            .notifications
            .list(NotificationQuery {
                recipient_id: student.to_string(),
                recipient_kind: RecipientKind::Student,
                deleted: DeletedFilter::ActiveOnly,
                unread_only: true,
                notification_type: Some(NotificationType::Task),
                page: 1,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(list.len(), 1);
        assert!(list[0].content.contains("edit access"));
    }
}

#[tokio::test]
async fn read_and_delete_lifecycle_stays_consistent() {
    let app = test_app();

    let n = app
        .notifications
        .notify(CreateNotificationRequest {
            recipient_id: "stu_1".to_string(),
            recipient_kind: RecipientKind::Student,
            recipient_role: None,
            notification_type: NotificationType::Account,
            content: NotificationContent::Template {
                key: "account.new_device_login".to_string(),
                params: json!({"device": "Firefox on Linux"}),
            },
            related_id: None,
            related_data: None,
        })
        .await
        .unwrap();

    app.notifications
        .mark_read("stu_1", RecipientKind::Student, &n.id)
        .await
        .unwrap();
    app.notifications
        .delete("stu_1", RecipientKind::Student, &n.id)
        .await
        .unwrap();

    // 删除后默认列表为空, 恢复列表显式查询 deleted_only
    let active = app
        .notifications
        .list(NotificationQuery {
            recipient_id: "stu_1".to_string(),
            recipient_kind: RecipientKind::Student,
            deleted: DeletedFilter::ActiveOnly,
            unread_only: false,
            notification_type: None,
            page: 1,
            limit: 10,
        })
        .await
        .unwrap();
    assert!(active.is_empty());

    let deleted = app
        .notifications
        .list(NotificationQuery {
            recipient_id: "stu_1".to_string(),
            recipient_kind: RecipientKind::Student,
            deleted: DeletedFilter::DeletedOnly,
            unread_only: false,
            notification_type: None,
            page: 1,
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(deleted.len(), 1);

    let restored = app
        .notifications
        .restore("stu_1", RecipientKind::Student, &n.id)
        .await
        .unwrap();
    // 恢复只影响删除标志, 读状态保持已读
    assert!(!restored.is_deleted);
    assert!(restored.is_read);
}
