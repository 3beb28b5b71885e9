use crate::{
    config::Config,
    services::{
        access::TaskAccessService,
        fanout::NotificationService,
        stream::NotificationStream,
    },
};

/// 应用程序的共享状态
/// 包含所有服务和配置的引用
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 通知扇出服务
    pub notification_service: NotificationService,

    /// 任务访问控制服务
    pub task_access_service: TaskAccessService,

    /// 实时通知流
    pub notification_stream: NotificationStream,
}

impl AppState {
    /// 检查是否为生产环境
    pub fn is_production(&self) -> bool {
        self.config.is_production()
    }

    /// 检查是否为开发环境
    pub fn is_development(&self) -> bool {
        self.config.is_development()
    }
}
