//! 基础设施层实现。
//!
//! 提供 Postgres 仓储、进程内广播网关和装配入口，实现应用层定义的端口。

pub mod broadcast;
pub mod builder;
pub mod migrations;
pub mod repository;

pub use broadcast::LocalChatBroadcaster;
pub use builder::{Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use repository::{
    create_pg_pool, PgChatRoomRepository, PgMessageRepository, PgParticipantRepository,
    PgStorage, PgUserDirectory,
};
