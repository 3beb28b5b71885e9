use crate::{
    error::{AppError, Result},
    models::account::{AuthUser, RecipientKind, RecipientRole},
    state::AppState,
};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// 会话令牌的声明: 上游认证服务签发的 (userId, userKind, role?) 三元组
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub kind: RecipientKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<RecipientRole>,
    pub exp: i64,
    pub iat: i64,
}

/// 认证中间件
///
/// 验证 Bearer JWT 并把解析出的三元组放进请求扩展;
/// 验证失败的请求继续作为未认证请求处理, 由提取器决定是否拒绝
pub async fn auth_middleware(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next<Body>,
) -> Result<Response> {
    if let Some(auth_header) = headers.get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                match verify_token(token, &app_state.config.jwt_secret) {
                    Ok(user) => {
                        debug!("Authenticated {} ({})", user.id, user.kind);
                        request.extensions_mut().insert(user);
                    }
                    Err(e) => {
                        debug!("JWT verification failed: {}", e);
                    }
                }
            }
        }
    }

    Ok(next.run(request).await)
}

fn verify_token(token: &str, secret: &str) -> Result<AuthUser> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let claims = decode::<Claims>(token, &decoding_key, &Validation::default())?.claims;
    Ok(AuthUser {
        id: claims.sub,
        kind: claims.kind,
        role: claims.role,
    })
}

/// 必须认证的提取器: 缺少有效令牌时返回 401
pub struct RequireAuth(pub AuthUser);

#[async_trait::async_trait]
impl<S> axum::extract::FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(RequireAuth)
            .ok_or_else(|| AppError::unauthorized("Authentication required"))
    }
}

/// 请求日志中间件
pub async fn request_logging_middleware(request: Request<Body>, next: Next<Body>) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let start_time = std::time::Instant::now();
    debug!("Incoming request: {} {}", method, uri);

    let response = next.run(request).await;

    let elapsed = start_time.elapsed();
    info!(
        "Request completed: {} {} {} - {}ms",
        method,
        uri,
        response.status().as_u16(),
        elapsed.as_millis()
    );

    response
}
