//! 聊天协调器单元测试
//!
//! 用内存存储、内存在线状态跟踪器和记录式广播网关驱动协调器，
//! 覆盖房间生命周期、游标翻页、未读数扇出和在线状态降级行为。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use domain::{DomainError, MessageId, RoomEvent, RoomId, UnreadDelta, UserId};
use futures::future::join_all;

use crate::broadcaster::{BroadcastError, ChatBroadcaster};
use crate::clock::SystemClock;
use crate::error::ApplicationError;
use crate::presence::memory::{FailingPresenceTracker, MemoryPresenceTracker};
use crate::presence::PresenceTracker;
use crate::repository::memory::MemoryStorage;
use crate::repository::{ChatRoomRepository, ParticipantRepository};
use crate::services::{ChatService, ChatServiceDependencies};

/// 记录式广播网关，把每次推送存下来供断言。
#[derive(Default)]
struct RecordingBroadcaster {
    room_events: Mutex<Vec<(RoomId, RoomEvent)>>,
    user_notifications: Mutex<Vec<(UserId, UnreadDelta)>>,
}

impl RecordingBroadcaster {
    fn room_events(&self) -> Vec<(RoomId, RoomEvent)> {
        self.room_events.lock().unwrap().clone()
    }

    fn user_notifications(&self) -> Vec<(UserId, UnreadDelta)> {
        self.user_notifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBroadcaster for RecordingBroadcaster {
    async fn publish_to_room(
        &self,
        room_id: RoomId,
        event: RoomEvent,
    ) -> Result<(), BroadcastError> {
        self.room_events.lock().unwrap().push((room_id, event));
        Ok(())
    }

    async fn publish_to_user(
        &self,
        user_id: UserId,
        delta: UnreadDelta,
    ) -> Result<(), BroadcastError> {
        self.user_notifications.lock().unwrap().push((user_id, delta));
        Ok(())
    }
}

struct TestContext {
    storage: Arc<MemoryStorage>,
    presence: Arc<MemoryPresenceTracker>,
    broadcaster: Arc<RecordingBroadcaster>,
    service: ChatService,
}

fn build_service() -> TestContext {
    let storage = Arc::new(MemoryStorage::new());
    let presence = Arc::new(MemoryPresenceTracker::new(Duration::from_secs(300)));
    let broadcaster = Arc::new(RecordingBroadcaster::default());

    let service = ChatService::new(ChatServiceDependencies {
        room_repository: storage.clone(),
        participant_repository: storage.clone(),
        message_repository: storage.clone(),
        user_directory: storage.clone(),
        presence: presence.clone(),
        broadcaster: broadcaster.clone(),
        clock: Arc::new(SystemClock),
        default_page_size: 20,
    });

    TestContext {
        storage,
        presence,
        broadcaster,
        service,
    }
}


#[tokio::test]
async fn create_direct_room_is_idempotent() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;

    let first = ctx.service.create_direct_room(alice, bob).await.unwrap();
    let second = ctx.service.create_direct_room(alice, bob).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(ctx.storage.count_by_room(first.id).await.unwrap(), 2);

    let participant = ctx.storage.find(first.id, bob).await.unwrap().unwrap();
    assert_eq!(participant.last_read_message_id, MessageId::NONE);
}

#[tokio::test]
async fn create_direct_room_rejects_self_target() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;

    let result = ctx.service.create_direct_room(alice, alice).await;
    assert!(matches!(
        result,
        Err(ApplicationError::Domain(DomainError::SelfChatNotAllowed))
    ));
}

#[tokio::test]
async fn create_direct_room_requires_existing_users() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;

    let result = ctx.service.create_direct_room(alice, UserId(999)).await;
    assert!(matches!(
        result,
        Err(ApplicationError::Domain(DomainError::UserNotFound))
    ));
}

#[tokio::test]
async fn group_room_is_not_reused_for_direct_chat() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;

    let group = ctx
        .service
        .create_group_room(alice, "周末登山队")
        .await
        .unwrap();
    ctx.service.join_room(bob, group.id).await.unwrap();

    // 组队房间里有同样两个人，但 1:1 去重查询必须跳过它
    let direct = ctx.service.create_direct_room(alice, bob).await.unwrap();
    assert_ne!(direct.id, group.id);
}

#[tokio::test]
async fn message_ids_are_strictly_increasing() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;
    let room = ctx.service.create_direct_room(alice, bob).await.unwrap();

    let mut ids = Vec::new();
    for i in 0..5 {
        let view = ctx
            .service
            .send_message(alice, room.id, format!("msg {i}"))
            .await
            .unwrap();
        ids.push(view.id);
    }

    for pair in ids.windows(2) {
        assert!(pair[0] < pair[1], "ids must strictly increase");
    }
}

#[tokio::test]
async fn concurrent_sends_lose_no_message() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;
    let room = ctx.service.create_direct_room(alice, bob).await.unwrap();

    let sends = (0..10).map(|i| {
        let sender = if i % 2 == 0 { alice } else { bob };
        ctx.service.send_message(sender, room.id, format!("m{i}"))
    });
    let results = join_all(sends).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let page = ctx
        .service
        .list_messages(alice, room.id, None, Some(50))
        .await
        .unwrap();
    assert_eq!(page.messages.len(), 10);

    let mut ids: Vec<MessageId> = page.messages.iter().map(|m| m.id).collect();
    let before = ids.clone();
    ids.dedup();
    assert_eq!(ids, before, "no id may repeat");
}

#[tokio::test]
async fn pagination_walks_twenty_messages_in_two_pages() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;
    let room = ctx.service.create_direct_room(alice, bob).await.unwrap();

    for i in 1..=20 {
        ctx.service
            .send_message(alice, room.id, format!("msg {i}"))
            .await
            .unwrap();
    }

    let page1 = ctx
        .service
        .list_messages(bob, room.id, None, Some(10))
        .await
        .unwrap();
    let ids1: Vec<i64> = page1.messages.iter().map(|m| m.id.0).collect();
    assert_eq!(ids1, (11..=20).rev().collect::<Vec<i64>>());
    assert!(page1.has_next);
    assert_eq!(page1.next_cursor, Some(MessageId(11)));

    let page2 = ctx
        .service
        .list_messages(bob, room.id, page1.next_cursor, Some(10))
        .await
        .unwrap();
    let ids2: Vec<i64> = page2.messages.iter().map(|m| m.id.0).collect();
    assert_eq!(ids2, (1..=10).rev().collect::<Vec<i64>>());
    assert!(!page2.has_next);
    assert_eq!(page2.next_cursor, None);

    // 两页拼接无重叠、整体降序
    let mut all = ids1;
    all.extend(ids2);
    assert_eq!(all, (1..=20).rev().collect::<Vec<i64>>());
}

#[tokio::test]
async fn has_next_heuristic_false_positive_at_exact_boundary() {
    // 恰好取满一页时 has_next 为真是启发式的既定行为，
    // 代价只是一次空的后续请求，这里按文档行为断言而不是当 bug。
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;
    let room = ctx.service.create_direct_room(alice, bob).await.unwrap();

    for i in 1..=10 {
        ctx.service
            .send_message(alice, room.id, format!("msg {i}"))
            .await
            .unwrap();
    }

    let page = ctx
        .service
        .list_messages(bob, room.id, None, Some(10))
        .await
        .unwrap();
    assert!(page.has_next, "full page implies more may exist");

    let follow_up = ctx
        .service
        .list_messages(bob, room.id, page.next_cursor, Some(10))
        .await
        .unwrap();
    assert!(follow_up.messages.is_empty());
    assert!(!follow_up.has_next);
}

#[tokio::test]
async fn send_to_inactive_recipient_pushes_unread_delta() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;
    let room = ctx.service.create_direct_room(alice, bob).await.unwrap();

    ctx.service.open_room(alice, room.id).await.unwrap();

    let view = ctx.service.send_message(alice, room.id, "hi").await.unwrap();

    // 活跃的发送者：发送即视为已读
    let sender = ctx.storage.find(room.id, alice).await.unwrap().unwrap();
    assert_eq!(sender.last_read_message_id, view.id);

    // 离线的 B 收到未读数增量 1
    let notifications = ctx.broadcaster.user_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].0, bob);
    assert_eq!(notifications[0].1, UnreadDelta::new(room.id, 1));

    // B 无游标拉取，拿到这条消息且没有下一页
    let page = ctx
        .service
        .list_messages(bob, room.id, None, None)
        .await
        .unwrap();
    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.messages[0].content, "hi");
    assert_eq!(page.messages[0].sender_name, "Alice");
    assert!(!page.has_next);
}

#[tokio::test]
async fn active_recipient_gets_broadcast_but_no_unread_delta() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;
    let room = ctx.service.create_direct_room(alice, bob).await.unwrap();

    ctx.service.open_room(bob, room.id).await.unwrap();
    ctx.service.send_message(alice, room.id, "hi").await.unwrap();

    assert!(ctx.broadcaster.user_notifications().is_empty());

    let events = ctx.broadcaster.room_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0].1, RoomEvent::MessageCreated { .. }));
}

#[tokio::test]
async fn inactive_sender_pointer_stays_behind() {
    // 产品决策：presence 为 Closed 的发送者不静默推进已读指针，
    // 未读数本就不含自己的消息，下次 open 会自愈。
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;
    let room = ctx.service.create_direct_room(alice, bob).await.unwrap();

    ctx.service.send_message(alice, room.id, "hi").await.unwrap();

    let sender = ctx.storage.find(room.id, alice).await.unwrap().unwrap();
    assert_eq!(sender.last_read_message_id, MessageId::NONE);
}

#[tokio::test]
async fn open_room_marks_presence_and_zeroes_unread() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;
    let room = ctx.service.create_direct_room(alice, bob).await.unwrap();

    for _ in 0..3 {
        ctx.service.send_message(alice, room.id, "ping").await.unwrap();
    }

    let before = ctx.service.list_rooms(bob).await.unwrap();
    assert_eq!(before[0].unread_count, 3);

    ctx.service.open_room(bob, room.id).await.unwrap();

    assert!(ctx.presence.is_active(room.id, bob).await.unwrap());
    let after = ctx.service.list_rooms(bob).await.unwrap();
    assert_eq!(after[0].unread_count, 0);
}

#[tokio::test]
async fn close_room_clears_presence_but_keeps_pointer() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;
    let room = ctx.service.create_direct_room(alice, bob).await.unwrap();

    ctx.service.send_message(alice, room.id, "hi").await.unwrap();
    ctx.service.open_room(bob, room.id).await.unwrap();
    let pointer_before = ctx
        .storage
        .find(room.id, bob)
        .await
        .unwrap()
        .unwrap()
        .last_read_message_id;

    ctx.service.close_room(bob, room.id).await.unwrap();

    assert!(!ctx.presence.is_active(room.id, bob).await.unwrap());
    let pointer_after = ctx
        .storage
        .find(room.id, bob)
        .await
        .unwrap()
        .unwrap()
        .last_read_message_id;
    assert_eq!(pointer_before, pointer_after);

    let summaries = ctx.service.list_rooms(bob).await.unwrap();
    assert_eq!(summaries[0].unread_count, 0);
}

#[tokio::test]
async fn expired_presence_treats_user_as_inactive() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;
    let room = ctx.service.create_direct_room(alice, bob).await.unwrap();

    ctx.service.open_room(bob, room.id).await.unwrap();
    ctx.presence.expire_now(room.id, bob).await;
    // 迟到的心跳不能复活已过期的在线状态
    ctx.service.refresh_room(bob, room.id).await.unwrap();

    ctx.service.send_message(alice, room.id, "hi").await.unwrap();

    let notifications = ctx.broadcaster.user_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].0, bob);
}

#[tokio::test]
async fn presence_outage_over_notifies_instead_of_failing() {
    let storage = Arc::new(MemoryStorage::new());
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let service = ChatService::new(ChatServiceDependencies {
        room_repository: storage.clone(),
        participant_repository: storage.clone(),
        message_repository: storage.clone(),
        user_directory: storage.clone(),
        presence: Arc::new(FailingPresenceTracker),
        broadcaster: broadcaster.clone(),
        clock: Arc::new(SystemClock),
        default_page_size: 20,
    });

    let alice = storage.add_user("Alice").await;
    let bob = storage.add_user("Bob").await;
    let room = service.create_direct_room(alice, bob).await.unwrap();

    // 缓存故障时 open/close 仍然成功，发送不受影响
    service.open_room(bob, room.id).await.unwrap();
    service.send_message(alice, room.id, "hi").await.unwrap();

    // 所有人按离线处理：B 照常收到未读通知
    let notifications = broadcaster.user_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].0, bob);
}

#[tokio::test]
async fn non_member_operations_are_rejected() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;
    let eve = ctx.storage.add_user("Eve").await;
    let room = ctx.service.create_direct_room(alice, bob).await.unwrap();

    let send = ctx.service.send_message(eve, room.id, "hi").await;
    assert!(matches!(
        send,
        Err(ApplicationError::Domain(DomainError::NotAParticipant))
    ));

    let list = ctx.service.list_messages(eve, room.id, None, None).await;
    assert!(matches!(
        list,
        Err(ApplicationError::Domain(DomainError::NotAParticipant))
    ));

    let open = ctx.service.open_room(eve, room.id).await;
    assert!(matches!(
        open,
        Err(ApplicationError::Domain(DomainError::NotAParticipant))
    ));
}

#[tokio::test]
async fn missing_room_is_reported_as_not_found() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;

    let result = ctx.service.open_room(alice, RoomId(404)).await;
    assert!(matches!(
        result,
        Err(ApplicationError::Domain(DomainError::RoomNotFound))
    ));
}

#[tokio::test]
async fn only_author_may_delete_message() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;
    let room = ctx.service.create_direct_room(alice, bob).await.unwrap();

    let view = ctx.service.send_message(alice, room.id, "hi").await.unwrap();

    let result = ctx.service.delete_message(bob, room.id, view.id).await;
    assert!(matches!(
        result,
        Err(ApplicationError::Domain(DomainError::NotMessageAuthor))
    ));

    // 消息仍在日志里
    let page = ctx
        .service
        .list_messages(bob, room.id, None, None)
        .await
        .unwrap();
    assert_eq!(page.messages.len(), 1);
}

#[tokio::test]
async fn author_delete_broadcasts_deletion_event() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;
    let room = ctx.service.create_direct_room(alice, bob).await.unwrap();

    let view = ctx.service.send_message(alice, room.id, "hi").await.unwrap();
    ctx.service
        .delete_message(alice, room.id, view.id)
        .await
        .unwrap();

    let page = ctx
        .service
        .list_messages(alice, room.id, None, None)
        .await
        .unwrap();
    assert!(page.messages.is_empty());

    let events = ctx.broadcaster.room_events();
    assert!(events
        .iter()
        .any(|(_, event)| matches!(event, RoomEvent::MessageDeleted { message_id } if *message_id == view.id)));
}

#[tokio::test]
async fn last_leave_cascades_room_and_group_binding() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;

    let room = ctx
        .service
        .create_group_room(alice, "读书会")
        .await
        .unwrap();
    ctx.service.join_room(bob, room.id).await.unwrap();

    ctx.service.leave_room(alice, room.id).await.unwrap();
    assert!(ctx.storage.find_by_id(room.id).await.unwrap().is_some());

    ctx.service.leave_room(bob, room.id).await.unwrap();
    assert!(ctx.storage.find_by_id(room.id).await.unwrap().is_none());
    assert!(ctx
        .storage
        .find_group_binding(room.id)
        .await
        .unwrap()
        .is_none());

    // 幂等删除：对已删除的房间再删一次也是成功
    ctx.storage.delete(room.id).await.unwrap();
}

#[tokio::test]
async fn room_list_shows_titles_previews_and_ordering() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;

    let direct = ctx.service.create_direct_room(alice, bob).await.unwrap();
    let group = ctx
        .service
        .create_group_room(bob, "算法学习小组")
        .await
        .unwrap();
    ctx.service.join_room(alice, group.id).await.unwrap();

    ctx.service
        .send_message(bob, direct.id, "first")
        .await
        .unwrap();
    // 拉开两条消息的时间戳，保证活跃度排序可断言
    tokio::time::sleep(Duration::from_millis(5)).await;
    ctx.service
        .send_message(bob, group.id, "second")
        .await
        .unwrap();

    let summaries = ctx.service.list_rooms(alice).await.unwrap();
    assert_eq!(summaries.len(), 2);

    // 最近活跃的组队房间排在前面
    assert_eq!(summaries[0].room_id, group.id);
    assert_eq!(summaries[0].title, "算法学习小组");
    assert_eq!(summaries[0].last_message_preview, "second");
    assert_eq!(summaries[0].unread_count, 1);

    assert_eq!(summaries[1].room_id, direct.id);
    assert_eq!(summaries[1].title, "Bob");
    assert_eq!(summaries[1].last_message_preview, "first");
}

#[tokio::test]
async fn deleted_author_messages_show_fallback_and_skip_unread() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;
    let room = ctx.service.create_direct_room(alice, bob).await.unwrap();

    ctx.service.send_message(alice, room.id, "hi").await.unwrap();
    ctx.storage.remove_user(alice).await;

    let page = ctx
        .service
        .list_messages(bob, room.id, None, None)
        .await
        .unwrap();
    assert_eq!(page.messages[0].sender_id, None);
    assert_eq!(page.messages[0].sender_name, domain::UNKNOWN_USER_NAME);

    // 作者置空的消息不计入未读
    let summaries = ctx.service.list_rooms(bob).await.unwrap();
    assert_eq!(summaries[0].unread_count, 0);
}

#[tokio::test]
async fn empty_content_is_rejected_before_persisting() {
    let ctx = build_service();
    let alice = ctx.storage.add_user("Alice").await;
    let bob = ctx.storage.add_user("Bob").await;
    let room = ctx.service.create_direct_room(alice, bob).await.unwrap();

    let result = ctx.service.send_message(alice, room.id, "   ").await;
    assert!(matches!(
        result,
        Err(ApplicationError::Domain(DomainError::InvalidContent { .. }))
    ));

    let page = ctx
        .service
        .list_messages(alice, room.id, None, None)
        .await
        .unwrap();
    assert!(page.messages.is_empty());
}
