//! 进程内的实时通知发布/订阅中心
//!
//! 尽力而为且不持久: 断开的客户端错过的事件靠重连后的未读计数拉取补偿。
//! 中心隐藏在 publish/subscribe 接口后, 多实例部署时可以换成外部
//! 发布订阅通道而不触及扇出引擎的调用点。

use crate::models::{
    account::{RecipientKind, RecipientRole},
    notification::Notification,
};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct Subscriber {
    recipient_id: String,
    recipient_kind: RecipientKind,
    role: Option<RecipientRole>,
    tx: mpsc::UnboundedSender<Notification>,
}

struct StreamInner {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
}

/// 订阅句柄: 释放时自动从注册表注销, 订阅者数量不会无界增长
pub struct StreamSubscription {
    id: u64,
    inner: Arc<StreamInner>,
    pub receiver: mpsc::UnboundedReceiver<Notification>,
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        self.inner.subscribers.write().remove(&self.id);
        debug!("Stream subscriber {} deregistered", self.id);
    }
}

/// 实时通知流
#[derive(Clone)]
pub struct NotificationStream {
    inner: Arc<StreamInner>,
}

impl Default for NotificationStream {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationStream {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StreamInner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// 为一个接收方注册订阅, 过滤谓词 (接收方匹配) 在注册时固定
    pub fn subscribe(
        &self,
        recipient_id: &str,
        recipient_kind: RecipientKind,
        role: Option<RecipientRole>,
    ) -> StreamSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner.subscribers.write().insert(
            id,
            Subscriber {
                recipient_id: recipient_id.to_string(),
                recipient_kind,
                role,
                tx,
            },
        );
        debug!(
            "Stream subscriber {} registered for {} ({})",
            id, recipient_id, recipient_kind
        );

        StreamSubscription {
            id,
            inner: self.inner.clone(),
            receiver: rx,
        }
    }

    /// 向匹配的订阅者广播一条新通知, 返回投递数量
    ///
    /// 投递失败只记录日志, 永远不向触发方传播
    pub fn publish(&self, notification: &Notification) -> usize {
        let mut delivered = 0;
        let mut stale = Vec::new();

        {
            let subscribers = self.inner.subscribers.read();
            for (id, subscriber) in subscribers.iter() {
                if !Self::addressed_to(notification, subscriber) {
                    continue;
                }
                match subscriber.tx.send(notification.clone()) {
                    Ok(_) => delivered += 1,
                    Err(_) => {
                        warn!(
                            "Stream delivery to subscriber {} failed, pruning dead connection",
                            id
                        );
                        stale.push(*id);
                    }
                }
            }
        }

        if !stale.is_empty() {
            let mut subscribers = self.inner.subscribers.write();
            for id in stale {
                subscribers.remove(&id);
            }
        }

        delivered
    }

    /// 接收方匹配: id 与类别相同, 且角色限定的通知只达到同角色订阅者
    fn addressed_to(notification: &Notification, subscriber: &Subscriber) -> bool {
        if subscriber.recipient_id != notification.recipient_id
            || subscriber.recipient_kind != notification.recipient_kind
        {
            return false;
        }
        match &notification.recipient_role {
            Some(required) => subscriber
                .role
                .as_ref()
                .map_or(false, |role| required.matches(role)),
            None => true,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// 清理接收端已关闭的订阅, 返回清理数量
    ///
    /// 注销通常由句柄的 Drop 完成; 周期性清扫兜住只关闭了接收通道
    /// 而没有释放句柄的连接
    pub fn prune_closed(&self) -> usize {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|id, subscriber| {
            if subscriber.tx.is_closed() {
                warn!("Pruning stale stream subscriber {}", id);
                false
            } else {
                true
            }
        });
        before - subscribers.len()
    }
}
