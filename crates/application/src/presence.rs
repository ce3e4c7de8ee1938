//! 在线状态跟踪
//!
//! 记录"谁当前打开着哪个房间"的短时事实，按 (room, user) 存 TTL 标记。
//! 这份状态没有任何持久化保证，唯一的用途是判断要不要抑制一次推送通知；
//! 它从不参与持久化事务。

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use domain::{RoomId, UserId};

/// 在线状态缓存错误。
///
/// 调用方把它当作降级信号处理：缓存不可用时按"所有人离线"处理
/// （宁可多发通知），而不是让聊天操作失败。
#[derive(Debug, Error, Clone)]
pub enum PresenceError {
    #[error("presence cache error: {0}")]
    Cache(String),
}

impl PresenceError {
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }
}

/// 在线状态跟踪器。
///
/// 状态机（每个 (room, user)）：Closed → Open（open）→ Open（refresh，
/// TTL 顺延）→ Closed（close 或 TTL 静默过期）。所有操作幂等。
#[async_trait::async_trait]
pub trait PresenceTracker: Send + Sync {
    /// 打开房间：写入 TTL 标记。
    async fn mark_active(&self, room_id: RoomId, user_id: UserId) -> Result<(), PresenceError>;

    /// 关闭房间：无条件删除标记，键不存在也是成功。
    async fn mark_inactive(&self, room_id: RoomId, user_id: UserId) -> Result<(), PresenceError>;

    /// 标记是否存在。
    async fn is_active(&self, room_id: RoomId, user_id: UserId) -> Result<bool, PresenceError>;

    /// 续期：仅当标记仍存在时重置 TTL。对已过期的标记是 no-op，
    /// 迟到的心跳不能让过期的在线状态复活。
    async fn refresh(&self, room_id: RoomId, user_id: UserId) -> Result<(), PresenceError>;
}

/// Redis 实现的在线状态跟踪器
pub struct RedisPresenceTracker {
    redis_client: Arc<redis::Client>,
    ttl_seconds: u64,
}

impl RedisPresenceTracker {
    pub fn new(redis_client: Arc<redis::Client>, ttl_seconds: u64) -> Self {
        Self {
            redis_client,
            ttl_seconds,
        }
    }

    fn active_key(&self, room_id: RoomId, user_id: UserId) -> String {
        format!("chat:active:{}:{}", room_id, user_id)
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, PresenceError> {
        self.redis_client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| PresenceError::cache(format!("Redis connection failed: {e}")))
    }
}

#[async_trait::async_trait]
impl PresenceTracker for RedisPresenceTracker {
    async fn mark_active(&self, room_id: RoomId, user_id: UserId) -> Result<(), PresenceError> {
        let mut conn = self.get_connection().await?;
        let key = self.active_key(room_id, user_id);

        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg("active")
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| PresenceError::cache(format!("Redis operation failed: {e}")))?;

        tracing::debug!(room_id = %room_id, user_id = %user_id, "用户打开房间");
        Ok(())
    }

    async fn mark_inactive(&self, room_id: RoomId, user_id: UserId) -> Result<(), PresenceError> {
        let mut conn = self.get_connection().await?;
        let key = self.active_key(room_id, user_id);

        let _: () = redis::cmd("DEL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| PresenceError::cache(format!("Redis operation failed: {e}")))?;

        tracing::debug!(room_id = %room_id, user_id = %user_id, "用户关闭房间");
        Ok(())
    }

    async fn is_active(&self, room_id: RoomId, user_id: UserId) -> Result<bool, PresenceError> {
        let mut conn = self.get_connection().await?;
        let key = self.active_key(room_id, user_id);

        let exists: bool = redis::cmd("EXISTS")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| PresenceError::cache(format!("Redis operation failed: {e}")))?;

        Ok(exists)
    }

    async fn refresh(&self, room_id: RoomId, user_id: UserId) -> Result<(), PresenceError> {
        let mut conn = self.get_connection().await?;
        let key = self.active_key(room_id, user_id);

        // EXPIRE 对不存在的键返回 0，正好就是要的语义
        let _: i64 = redis::cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| PresenceError::cache(format!("Redis operation failed: {e}")))?;

        Ok(())
    }
}

/// 内存实现的在线状态跟踪器（用于测试）
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::time::Instant;
    use tokio::sync::RwLock;

    pub struct MemoryPresenceTracker {
        ttl: Duration,
        deadlines: RwLock<HashMap<(RoomId, UserId), Instant>>,
    }

    impl MemoryPresenceTracker {
        pub fn new(ttl: Duration) -> Self {
            Self {
                ttl,
                deadlines: RwLock::new(HashMap::new()),
            }
        }

        /// 强制让某个标记过期（模拟 TTL 到期）。
        pub async fn expire_now(&self, room_id: RoomId, user_id: UserId) {
            let mut deadlines = self.deadlines.write().await;
            if let Some(deadline) = deadlines.get_mut(&(room_id, user_id)) {
                *deadline = Instant::now() - Duration::from_secs(1);
            }
        }
    }

    impl Default for MemoryPresenceTracker {
        fn default() -> Self {
            Self::new(Duration::from_secs(300))
        }
    }

    #[async_trait::async_trait]
    impl PresenceTracker for MemoryPresenceTracker {
        async fn mark_active(&self, room_id: RoomId, user_id: UserId) -> Result<(), PresenceError> {
            let mut deadlines = self.deadlines.write().await;
            deadlines.insert((room_id, user_id), Instant::now() + self.ttl);
            Ok(())
        }

        async fn mark_inactive(
            &self,
            room_id: RoomId,
            user_id: UserId,
        ) -> Result<(), PresenceError> {
            let mut deadlines = self.deadlines.write().await;
            deadlines.remove(&(room_id, user_id));
            Ok(())
        }

        async fn is_active(&self, room_id: RoomId, user_id: UserId) -> Result<bool, PresenceError> {
            let deadlines = self.deadlines.read().await;
            Ok(deadlines
                .get(&(room_id, user_id))
                .map(|deadline| *deadline > Instant::now())
                .unwrap_or(false))
        }

        async fn refresh(&self, room_id: RoomId, user_id: UserId) -> Result<(), PresenceError> {
            let mut deadlines = self.deadlines.write().await;
            // 只给仍然存活的标记续期
            if let Some(deadline) = deadlines.get_mut(&(room_id, user_id)) {
                if *deadline > Instant::now() {
                    *deadline = Instant::now() + self.ttl;
                }
            }
            Ok(())
        }
    }

    /// 始终失败的跟踪器，用于验证缓存故障时的降级行为。
    #[derive(Default)]
    pub struct FailingPresenceTracker;

    #[async_trait::async_trait]
    impl PresenceTracker for FailingPresenceTracker {
        async fn mark_active(&self, _: RoomId, _: UserId) -> Result<(), PresenceError> {
            Err(PresenceError::cache("presence cache down"))
        }

        async fn mark_inactive(&self, _: RoomId, _: UserId) -> Result<(), PresenceError> {
            Err(PresenceError::cache("presence cache down"))
        }

        async fn is_active(&self, _: RoomId, _: UserId) -> Result<bool, PresenceError> {
            Err(PresenceError::cache("presence cache down"))
        }

        async fn refresh(&self, _: RoomId, _: UserId) -> Result<(), PresenceError> {
            Err(PresenceError::cache("presence cache down"))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn refresh_does_not_resurrect_expired_marker() {
            let tracker = MemoryPresenceTracker::default();
            let (room, user) = (RoomId(1), UserId(1));

            tracker.mark_active(room, user).await.unwrap();
            tracker.expire_now(room, user).await;
            tracker.refresh(room, user).await.unwrap();

            assert!(!tracker.is_active(room, user).await.unwrap());
        }

        #[tokio::test]
        async fn mark_inactive_is_idempotent() {
            let tracker = MemoryPresenceTracker::default();
            let (room, user) = (RoomId(1), UserId(1));

            assert!(tracker.mark_inactive(room, user).await.is_ok());
            tracker.mark_active(room, user).await.unwrap();
            tracker.mark_inactive(room, user).await.unwrap();
            tracker.mark_inactive(room, user).await.unwrap();
            assert!(!tracker.is_active(room, user).await.unwrap());
        }
    }
}
