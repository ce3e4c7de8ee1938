//! 基础设施装配
//!
//! 从配置出发建立数据库连接池（并跑迁移）、Redis 客户端、
//! 在线状态缓存和进程内广播网关，最后装配出聊天协调器。

use std::sync::Arc;

use application::{ChatService, ChatServiceDependencies, RedisPresenceTracker, SystemClock};
use config::AppConfig;
use thiserror::Error;

use crate::{
    broadcast::LocalChatBroadcaster,
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[derive(Clone)]
pub struct Infrastructure {
    pub storage: Arc<PgStorage>,
    pub presence: Arc<RedisPresenceTracker>,
    pub broadcaster: Arc<LocalChatBroadcaster>,
    default_page_size: u32,
}

impl Infrastructure {
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!(
            max_connections = config.database.max_connections,
            "数据库连接池就绪，迁移已应用"
        );

        let redis_client = Arc::new(redis::Client::open(config.redis.url.as_str())?);

        let storage = Arc::new(PgStorage::new(pool));
        let presence = Arc::new(RedisPresenceTracker::new(
            redis_client,
            config.presence.ttl_seconds,
        ));
        let broadcaster = Arc::new(LocalChatBroadcaster::new(config.chat.broadcast_capacity));

        Ok(Self {
            storage,
            presence,
            broadcaster,
            default_page_size: config.chat.default_page_size,
        })
    }

    /// 装配聊天协调器。
    pub fn chat_service(&self) -> ChatService {
        ChatService::new(ChatServiceDependencies {
            room_repository: self.storage.room_repository.clone(),
            participant_repository: self.storage.participant_repository.clone(),
            message_repository: self.storage.message_repository.clone(),
            user_directory: self.storage.user_directory.clone(),
            presence: self.presence.clone(),
            broadcaster: self.broadcaster.clone(),
            clock: Arc::new(SystemClock),
            default_page_size: self.default_page_size,
        })
    }
}
