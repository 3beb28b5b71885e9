//! 账号目录与任务/项目目录的访问接口
//!
//! 两者都是外部协作方, 这里只定义核心消费的只读契约;
//! 内存实现用于单实例部署和测试, 生产部署替换为数据库支撑的实现。

use crate::{
    error::Result,
    models::{
        account::{RecipientKind, RecipientRole},
        task::TaskContext,
    },
};
use async_trait::async_trait;
use dashmap::DashMap;

/// 目录解析出的账号身份, 足以完成通知路由
#[derive(Debug, Clone)]
pub struct ResolvedRecipient {
    pub id: String,
    pub kind: RecipientKind,
    pub role: Option<RecipientRole>,
    /// 上级分组 (公司账号的公司 id, 学校账号的学校 id)
    pub parent_group_id: Option<String>,
}

/// 账号目录: 将逻辑接收方解析为可路由的身份
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn resolve(&self, id: &str, kind: RecipientKind) -> Result<Option<ResolvedRecipient>>;
}

/// 任务/项目目录 (对核心而言只读)
#[async_trait]
pub trait TaskDirectory: Send + Sync {
    async fn task_context(&self, task_id: &str) -> Result<Option<TaskContext>>;
}

fn account_key(id: &str, kind: RecipientKind) -> String {
    format!("{}:{}", kind, id)
}

/// 内存账号目录
#[derive(Default)]
pub struct MemoryRecipientDirectory {
    accounts: DashMap<String, ResolvedRecipient>,
}

impl MemoryRecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, recipient: ResolvedRecipient) {
        self.accounts
            .insert(account_key(&recipient.id, recipient.kind), recipient);
    }
}

#[async_trait]
impl RecipientDirectory for MemoryRecipientDirectory {
    async fn resolve(&self, id: &str, kind: RecipientKind) -> Result<Option<ResolvedRecipient>> {
        Ok(self
            .accounts
            .get(&account_key(id, kind))
            .map(|entry| entry.value().clone()))
    }
}

/// 内存任务目录
#[derive(Default)]
pub struct MemoryTaskDirectory {
    tasks: DashMap<String, TaskContext>,
}

impl MemoryTaskDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, context: TaskContext) {
        self.tasks.insert(context.task_id.clone(), context);
    }
}

#[async_trait]
impl TaskDirectory for MemoryTaskDirectory {
    async fn task_context(&self, task_id: &str) -> Result<Option<TaskContext>> {
        Ok(self.tasks.get(task_id).map(|entry| entry.value().clone()))
    }
}
