use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, Router},
};
use internhub_core::{
    config::Config,
    services::{
        access::TaskAccessService,
        directory::{MemoryRecipientDirectory, MemoryTaskDirectory},
        fanout::NotificationService,
        store::{MemoryNotificationStore, MemorySharingStore},
        stream::NotificationStream,
    },
    state::AppState,
    utils::middleware::{auth_middleware, request_logging_middleware},
};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "internhub_core=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting InternHub notification core...");

    // 加载配置
    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    // 协作方接口的内存实现 (单实例部署);
    // 生产部署用数据库支撑的实现替换这些 trait 对象
    let notification_store = Arc::new(MemoryNotificationStore::new());
    let recipient_directory = Arc::new(MemoryRecipientDirectory::new());
    let task_directory = Arc::new(MemoryTaskDirectory::new());
    let sharing_store = Arc::new(MemorySharingStore::new());

    // 初始化服务
    let notification_stream = NotificationStream::new();
    let notification_service = NotificationService::new(
        notification_store,
        recipient_directory.clone(),
        notification_stream.clone(),
    );
    let task_access_service = TaskAccessService::new(
        task_directory,
        recipient_directory,
        sharing_store,
        notification_service.clone(),
    );

    // 创建应用状态
    let app_state = Arc::new(AppState {
        config: config.clone(),
        notification_service,
        task_access_service,
        notification_stream,
    });

    // 清理失效流订阅任务
    let sweep_stream = app_state.notification_stream.clone();
    let sweep_secs = config.stream_sweep_interval_secs;
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(sweep_secs));

        loop {
            interval.tick().await;
            let pruned = sweep_stream.prune_closed();
            if pruned > 0 {
                info!("Pruned {} stale stream subscriber(s)", pruned);
            }
        }
    });

    // 配置 CORS
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_origin(
            config
                .cors_allowed_origins
                .split(',')
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        );

    // 构建应用路由 - 使用/api/internships/前缀避免网关路由冲突
    let app = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .nest(
            "/api/internships/notifications",
            internhub_core::routes::notifications::router(),
        )
        .nest(
            "/api/internships/tasks",
            internhub_core::routes::tasks::router(),
        )
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    // 启动主服务器
    let addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Starting server on http://{}", addr);

    axum::Server::bind(&addr.parse()?)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "InternHub core is running!"
}
