use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::notification::Notification;

/// 实时流消息类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StreamMessageType {
    // 系统消息
    Connect,
    Ping,
    Pong,
    Error,

    // 通知推送
    Notification,
}

/// 推送给已连接客户端的消息封装
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessage {
    pub id: String,
    pub message_type: StreamMessageType,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl StreamMessage {
    pub fn new(message_type: StreamMessageType, data: Value) -> Self {
        Self {
            id: format!("msg_{}", uuid::Uuid::new_v4()),
            message_type,
            data,
            timestamp: Utc::now(),
        }
    }

    /// 连接确认消息
    pub fn connect(recipient_id: &str) -> Self {
        Self::new(
            StreamMessageType::Connect,
            serde_json::json!({
                "recipient_id": recipient_id,
                "timestamp": Utc::now()
            }),
        )
    }

    /// 通知推送消息
    pub fn notification(notification: &Notification) -> Self {
        Self::new(
            StreamMessageType::Notification,
            serde_json::to_value(notification).unwrap_or_default(),
        )
    }

    /// 心跳应答
    pub fn pong(client_timestamp: Option<DateTime<Utc>>) -> Self {
        Self::new(
            StreamMessageType::Pong,
            serde_json::json!({
                "timestamp": Utc::now(),
                "client_timestamp": client_timestamp
            }),
        )
    }
}
