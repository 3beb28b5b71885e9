use crate::models::account::RecipientKind;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 共享授权级别 (view/edit), admin 级别保留给任务所属导师, 不可被授予
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    View,
    Edit,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::View => "view",
            AccessType::Edit => "edit",
        }
    }
}

/// 权限检查请求的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    View,
    Edit,
    Admin,
}

/// 任务上下文 (来自只读的任务/项目目录)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub task_id: String,
    pub task_name: String,
    pub project_id: String,
    pub project_title: String,
    /// 布置任务的导师账号 (任务的所有者)
    pub mentor_account_id: String,
    pub company_id: String,
    pub assigned_student_id: Option<String>,
    /// 项目已录取的学生
    pub selected_applicants: Vec<String>,
}

impl TaskContext {
    pub fn is_selected_applicant(&self, student_id: &str) -> bool {
        self.selected_applicants.iter().any(|s| s == student_id)
    }
}

/// 单个用户的共享授权
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskShareGrant {
    pub task_id: String,
    pub grantee_id: String,
    pub grantee_kind: RecipientKind,
    pub access_type: AccessType,
}

/// 任务级共享状态
///
/// 可见性从私有切到公开不会删除已有的单用户授权, 它们保持休眠,
/// 切回私有后仍然生效
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSharingState {
    pub is_public: bool,
    pub default_access: AccessType,
    pub grants: Vec<TaskShareGrant>,
}

impl Default for TaskSharingState {
    fn default() -> Self {
        Self {
            is_public: false,
            default_access: AccessType::View,
            grants: Vec::new(),
        }
    }
}

impl TaskSharingState {
    pub fn grant_for(&self, grantee_id: &str, grantee_kind: RecipientKind) -> Option<&TaskShareGrant> {
        self.grants
            .iter()
            .find(|g| g.grantee_id == grantee_id && g.grantee_kind == grantee_kind)
    }
}

/// 权限解析结果: 固定的布尔标志记录
///
/// 只有拥有任务的导师 (admin 解析路径) 会得到 can_manage_sharing=true
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResult {
    pub can_edit_status: bool,
    pub can_add_files: bool,
    pub can_remove_files: bool,
    pub can_remove_own_files: bool,
    pub can_add_comments: bool,
    pub can_edit_comments: bool,
    pub can_manage_sharing: bool,
}

impl PermissionResult {
    /// 所属导师: 全部标志为真
    pub fn admin() -> Self {
        Self {
            can_edit_status: true,
            can_add_files: true,
            can_remove_files: true,
            can_remove_own_files: true,
            can_add_comments: true,
            can_edit_comments: true,
            can_manage_sharing: true,
        }
    }

    /// 由授权级别派生的标志: view 仅可查看, edit 额外允许
    /// 增删自己的文件和评论, 永远不包含共享管理
    pub fn from_access(access: AccessType) -> Self {
        match access {
            AccessType::View => Self {
                can_edit_status: false,
                can_add_files: false,
                can_remove_files: false,
                can_remove_own_files: false,
                can_add_comments: false,
                can_edit_comments: false,
                can_manage_sharing: false,
            },
            AccessType::Edit => Self {
                can_edit_status: true,
                can_add_files: true,
                can_remove_files: false,
                can_remove_own_files: true,
                can_add_comments: true,
                can_edit_comments: true,
                can_manage_sharing: false,
            },
        }
    }

    /// 解析出的标志是否满足请求的动作
    pub fn satisfies(&self, action: TaskAction) -> bool {
        match action {
            TaskAction::View => true,
            TaskAction::Edit => self.can_edit_status,
            TaskAction::Admin => self.can_manage_sharing,
        }
    }
}

/// 共享授权请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ShareTaskRequest {
    #[validate(length(min = 1))]
    pub grantee_id: String,
    pub grantee_kind: RecipientKind,
    pub access_type: AccessType,
}

/// 撤销共享请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RemoveShareRequest {
    #[validate(length(min = 1))]
    pub grantee_id: String,
    pub grantee_kind: RecipientKind,
}

/// 可见性设置更新请求
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSharingRequest {
    pub is_public: Option<bool>,
    pub default_access: Option<AccessType>,
}
