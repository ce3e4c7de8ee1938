//! Postgres 仓储实现
//!
//! 需要原子性的多步写入（建房间带参与者）在单个事务里完成；
//! 房间删除依赖外键级联清掉参与者、消息和组队绑定，天然幂等。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

use application::repository::{
    ChatRoomRepository, MessageRepository, ParticipantRepository, RepositoryResult, UserDirectory,
};
use domain::{
    ChatRoom, GroupBinding, GroupId, Message, MessageContent, MessageId, Participant,
    RepositoryError, RoomId, Timestamp, UserId, UserProfile,
};

pub async fn create_pg_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: i64,
    created_at: DateTime<Utc>,
}

impl From<RoomRecord> for ChatRoom {
    fn from(value: RoomRecord) -> Self {
        ChatRoom::new(RoomId::from(value.id), value.created_at)
    }
}

#[derive(Debug, FromRow)]
struct ParticipantRecord {
    room_id: i64,
    user_id: i64,
    last_read_message_id: i64,
    joined_at: DateTime<Utc>,
}

impl From<ParticipantRecord> for Participant {
    fn from(value: ParticipantRecord) -> Self {
        Participant {
            room_id: RoomId::from(value.room_id),
            user_id: UserId::from(value.user_id),
            last_read_message_id: MessageId::from(value.last_read_message_id),
            joined_at: value.joined_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: i64,
    room_id: i64,
    sender_id: Option<i64>,
    content: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Message::new(
            MessageId::from(value.id),
            RoomId::from(value.room_id),
            value.sender_id.map(UserId::from),
            content,
            value.created_at,
        ))
    }
}

#[derive(Debug, FromRow)]
struct GroupRecord {
    id: i64,
    room_id: i64,
    title: String,
}

impl From<GroupRecord> for GroupBinding {
    fn from(value: GroupRecord) -> Self {
        GroupBinding::new(GroupId::from(value.id), RoomId::from(value.room_id), value.title)
    }
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<UserProfile>> {
        let record: Option<(i64, String)> =
            sqlx::query_as(r#"SELECT id, name FROM users WHERE id = $1"#)
                .bind(i64::from(id))
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        Ok(record.map(|(id, name)| UserProfile::new(UserId::from(id), name)))
    }
}

#[derive(Clone)]
pub struct PgChatRoomRepository {
    pool: PgPool,
}

impl PgChatRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatRoomRepository for PgChatRoomRepository {
    async fn create_direct(
        &self,
        user_a: UserId,
        user_b: UserId,
        now: Timestamp,
    ) -> RepositoryResult<ChatRoom> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = sqlx::query_as::<_, RoomRecord>(
            r#"INSERT INTO chat_rooms (created_at) VALUES ($1) RETURNING id, created_at"#,
        )
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO chat_participants (room_id, user_id, last_read_message_id, joined_at)
            VALUES ($1, $2, 0, $3), ($1, $4, 0, $3)
            "#,
        )
        .bind(record.id)
        .bind(i64::from(user_a))
        .bind(now)
        .bind(i64::from(user_b))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(ChatRoom::from(record))
    }

    async fn create_group(
        &self,
        owner: UserId,
        title: &str,
        now: Timestamp,
    ) -> RepositoryResult<(ChatRoom, GroupBinding)> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let room = sqlx::query_as::<_, RoomRecord>(
            r#"INSERT INTO chat_rooms (created_at) VALUES ($1) RETURNING id, created_at"#,
        )
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO chat_participants (room_id, user_id, last_read_message_id, joined_at)
            VALUES ($1, $2, 0, $3)
            "#,
        )
        .bind(room.id)
        .bind(i64::from(owner))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let group = sqlx::query_as::<_, GroupRecord>(
            r#"INSERT INTO chat_groups (room_id, title) VALUES ($1, $2) RETURNING id, room_id, title"#,
        )
        .bind(room.id)
        .bind(title)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok((ChatRoom::from(room), GroupBinding::from(group)))
    }

    async fn find_by_id(&self, id: RoomId) -> RepositoryResult<Option<ChatRoom>> {
        let record = sqlx::query_as::<_, RoomRecord>(
            r#"SELECT id, created_at FROM chat_rooms WHERE id = $1"#,
        )
        .bind(i64::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(ChatRoom::from))
    }

    async fn find_direct_between(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> RepositoryResult<Option<ChatRoom>> {
        // 两人共同所在、且未绑定组队记录的房间才算 1:1 房间
        let record = sqlx::query_as::<_, RoomRecord>(
            r#"
            SELECT r.id, r.created_at
            FROM chat_rooms r
            JOIN chat_participants p1 ON p1.room_id = r.id AND p1.user_id = $1
            JOIN chat_participants p2 ON p2.room_id = r.id AND p2.user_id = $2
            WHERE NOT EXISTS (SELECT 1 FROM chat_groups g WHERE g.room_id = r.id)
            LIMIT 1
            "#,
        )
        .bind(i64::from(user_a))
        .bind(i64::from(user_b))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(ChatRoom::from))
    }

    async fn list_by_user(&self, user_id: UserId) -> RepositoryResult<Vec<ChatRoom>> {
        let records = sqlx::query_as::<_, RoomRecord>(
            r#"
            SELECT r.id, r.created_at
            FROM chat_rooms r
            JOIN chat_participants p ON p.room_id = r.id
            WHERE p.user_id = $1
            ORDER BY r.created_at DESC
            "#,
        )
        .bind(i64::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(ChatRoom::from).collect())
    }

    async fn delete(&self, id: RoomId) -> RepositoryResult<()> {
        // 外键级联删除参与者、消息和组队绑定；0 行受影响也是成功
        sqlx::query(r#"DELETE FROM chat_rooms WHERE id = $1"#)
            .bind(i64::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_group_binding(&self, room_id: RoomId) -> RepositoryResult<Option<GroupBinding>> {
        let record = sqlx::query_as::<_, GroupRecord>(
            r#"SELECT id, room_id, title FROM chat_groups WHERE room_id = $1"#,
        )
        .bind(i64::from(room_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(GroupBinding::from))
    }

    async fn delete_group_binding(&self, room_id: RoomId) -> RepositoryResult<()> {
        sqlx::query(r#"DELETE FROM chat_groups WHERE room_id = $1"#)
            .bind(i64::from(room_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgParticipantRepository {
    pool: PgPool,
}

impl PgParticipantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParticipantRepository for PgParticipantRepository {
    async fn add(&self, participant: Participant) -> RepositoryResult<Participant> {
        sqlx::query(
            r#"
            INSERT INTO chat_participants (room_id, user_id, last_read_message_id, joined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (room_id, user_id) DO NOTHING
            "#,
        )
        .bind(i64::from(participant.room_id))
        .bind(i64::from(participant.user_id))
        .bind(i64::from(participant.last_read_message_id))
        .bind(participant.joined_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(participant)
    }

    async fn find(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Participant>> {
        let record = sqlx::query_as::<_, ParticipantRecord>(
            r#"
            SELECT room_id, user_id, last_read_message_id, joined_at
            FROM chat_participants
            WHERE room_id = $1 AND user_id = $2
            "#,
        )
        .bind(i64::from(room_id))
        .bind(i64::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Participant::from))
    }

    async fn is_member(&self, room_id: RoomId, user_id: UserId) -> RepositoryResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM chat_participants WHERE room_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(i64::from(room_id))
        .bind(i64::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(exists)
    }

    async fn list_by_room(&self, room_id: RoomId) -> RepositoryResult<Vec<Participant>> {
        let records = sqlx::query_as::<_, ParticipantRecord>(
            r#"
            SELECT room_id, user_id, last_read_message_id, joined_at
            FROM chat_participants
            WHERE room_id = $1
            ORDER BY user_id
            "#,
        )
        .bind(i64::from(room_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Participant::from).collect())
    }

    async fn count_by_room(&self, room_id: RoomId) -> RepositoryResult<u64> {
        let count: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM chat_participants WHERE room_id = $1"#)
                .bind(i64::from(room_id))
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        Ok(count as u64)
    }

    async fn remove(&self, room_id: RoomId, user_id: UserId) -> RepositoryResult<()> {
        sqlx::query(r#"DELETE FROM chat_participants WHERE room_id = $1 AND user_id = $2"#)
            .bind(i64::from(room_id))
            .bind(i64::from(user_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn advance_last_read(
        &self,
        room_id: RoomId,
        user_id: UserId,
        message_id: MessageId,
    ) -> RepositoryResult<()> {
        // GREATEST 保证指针只前进不后退
        sqlx::query(
            r#"
            UPDATE chat_participants
            SET last_read_message_id = GREATEST(last_read_message_id, $3)
            WHERE room_id = $1 AND user_id = $2
            "#,
        )
        .bind(i64::from(room_id))
        .bind(i64::from(user_id))
        .bind(i64::from(message_id))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn append(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        content: MessageContent,
        now: Timestamp,
    ) -> RepositoryResult<Message> {
        // BIGSERIAL 分配 ID，并发追加不会碰撞
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO chat_messages (room_id, sender_id, content, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, room_id, sender_id, content, created_at
            "#,
        )
        .bind(i64::from(room_id))
        .bind(i64::from(sender_id))
        .bind(content.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, room_id, sender_id, content, created_at
            FROM chat_messages
            WHERE id = $1
            "#,
        )
        .bind(i64::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn list_before(
        &self,
        room_id: RoomId,
        cursor: Option<MessageId>,
        limit: u32,
    ) -> RepositoryResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, room_id, sender_id, content, created_at
            FROM chat_messages
            WHERE room_id = $1 AND ($2::BIGINT IS NULL OR id < $2)
            ORDER BY id DESC
            LIMIT $3
            "#,
        )
        .bind(i64::from(room_id))
        .bind(cursor.map(i64::from))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }

    async fn latest_id(&self, room_id: RoomId) -> RepositoryResult<MessageId> {
        let latest: i64 = sqlx::query_scalar(
            r#"SELECT COALESCE(MAX(id), 0) FROM chat_messages WHERE room_id = $1"#,
        )
        .bind(i64::from(room_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(MessageId::from(latest))
    }

    async fn find_latest(&self, room_id: RoomId) -> RepositoryResult<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, room_id, sender_id, content, created_at
            FROM chat_messages
            WHERE room_id = $1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(i64::from(room_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn count_unread_since(
        &self,
        room_id: RoomId,
        last_read: MessageId,
        excluding: UserId,
    ) -> RepositoryResult<u64> {
        // sender_id 为 NULL 的行被 <> 比较自然排除
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM chat_messages
            WHERE room_id = $1 AND id > $2 AND sender_id <> $3
            "#,
        )
        .bind(i64::from(room_id))
        .bind(i64::from(last_read))
        .bind(i64::from(excluding))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(count as u64)
    }

    async fn delete(&self, id: MessageId) -> RepositoryResult<()> {
        sqlx::query(r#"DELETE FROM chat_messages WHERE id = $1"#)
            .bind(i64::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }
}

/// 一个连接池上的全套仓储。
#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_directory: Arc<PgUserDirectory>,
    pub room_repository: Arc<PgChatRoomRepository>,
    pub participant_repository: Arc<PgParticipantRepository>,
    pub message_repository: Arc<PgMessageRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_directory: Arc::new(PgUserDirectory::new(pool.clone())),
            room_repository: Arc::new(PgChatRoomRepository::new(pool.clone())),
            participant_repository: Arc::new(PgParticipantRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            pool,
        }
    }
}
