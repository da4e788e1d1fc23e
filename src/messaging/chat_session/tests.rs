use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::*;
use crate::messaging::Backend;
use crate::messaging::collaborators::SessionIdentity;
use crate::messaging::error::Result;
use crate::messaging::message_streaming::MessageBus;
use crate::messaging::test_utils::*;

fn with_teacher() -> ChannelSpec {
    ChannelSpec::WithCounterpart(pid("t1"))
}

fn contents(session: &ChatSession) -> Vec<&str> {
    session.messages().map(|m| m.content.as_str()).collect()
}

/// Accepts reads, refuses every append as invalid content.
struct RejectingStore;

#[async_trait]
impl MessageStore for RejectingStore {
    async fn append(
        &self,
        _channel: &ChannelId,
        _sender: &ParticipantId,
        _content: &str,
    ) -> Result<Message> {
        Err(MessagingError::Rejected("content refused".to_string()))
    }

    async fn history(&self, _channel: &ChannelId, _limit: usize) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }

    async fn recent_across(&self, _channels: &[ChannelId], _limit: usize) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_open_loads_history() {
    let (messaging, backend, _store, _identity, _data_temp) =
        create_test_messaging(Some("s1")).await;
    let channel = ChannelId::direct(&pid("s1"), &pid("t1"));
    backend.store.append(&channel, &pid("t1"), "Hola Ana").await.unwrap();
    backend.store.append(&channel, &pid("s1"), "Hola profe").await.unwrap();

    let session = messaging.open_chat_session(with_teacher(), None).await;

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.live_status(), LiveStatus::Live);
    assert_eq!(session.channel(), Some(&channel));
    assert_eq!(session.viewer(), Some(&pid("s1")));
    assert_eq!(contents(&session), vec!["Hola Ana", "Hola profe"]);
    assert_eq!(
        session.scroll_target(),
        session.messages().last().map(|m| &m.id)
    );
    assert!(session.error().is_none());
}

#[tokio::test]
async fn test_history_is_limited_to_most_recent() {
    let (backend, _data_temp) = create_test_backend().await;
    let channel = ChannelId::named("general");
    for text in ["uno", "dos", "tres"] {
        backend.store.append(&channel, &pid("t1"), text).await.unwrap();
    }

    let session = ChatSession::open(
        ChannelSpec::Named("general".to_string()),
        Some(pid("s1")),
        backend.store.clone(),
        backend.bus.clone(),
        Arc::new(SessionIdentity::pending()),
        2,
    )
    .await;

    assert_eq!(contents(&session), vec!["dos", "tres"]);
}

#[tokio::test]
async fn test_whitespace_send_is_a_no_op() {
    let (messaging, _backend, store, _identity, _data_temp) =
        create_test_messaging(Some("s1")).await;
    let mut session = messaging.open_chat_session(with_teacher(), None).await;
    session.set_draft("   ");

    let sent = session.send("  \n\t ").await;

    assert_eq!(sent, Ok(None));
    assert_eq!(store.append_calls(), 0);
    assert_eq!(session.message_count(), 0);
    assert!(session.error().is_none());
    assert_eq!(session.draft(), "   ");
}

#[tokio::test]
async fn test_failed_send_restores_draft() {
    let (messaging, backend, store, _identity, _data_temp) =
        create_test_messaging(Some("s1")).await;
    let mut session = messaging.open_chat_session(with_teacher(), None).await;
    let typed = "  ¿Hay tarea para mañana?  ".to_string();
    session.set_draft(typed.clone());
    store.set_fail_appends(true);

    let error = session.send(&typed).await.unwrap_err();

    assert!(matches!(error, ConversationError::SendFailed(_)));
    assert_eq!(session.draft(), typed);
    assert_eq!(session.error(), Some(&error));
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.message_count(), 0);

    store.set_fail_appends(false);
    let sent = session.send(&typed).await.unwrap().unwrap();

    assert_eq!(sent.content, "¿Hay tarea para mañana?");
    assert_eq!(session.draft(), "");
    assert!(session.error().is_none());
    let stored = backend.store.history(session.channel().unwrap(), 10).await.unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn test_rejected_send_is_a_validation_error() {
    let (backend, _data_temp) = create_test_backend().await;
    let mut session = ChatSession::open(
        with_teacher(),
        Some(pid("s1")),
        Arc::new(RejectingStore),
        backend.bus.clone(),
        Arc::new(SessionIdentity::pending()),
        50,
    )
    .await;

    let error = session.send("hola").await.unwrap_err();

    assert_eq!(error, ConversationError::ValidationRejected);
    assert!(!error.is_retryable());
    assert_eq!(session.draft(), "hola");
}

#[tokio::test]
async fn test_own_message_echo_is_not_duplicated() {
    let (messaging, backend, _store, _identity, _data_temp) =
        create_test_messaging(Some("s1")).await;
    let mut session = messaging.open_chat_session(with_teacher(), None).await;

    let sent = session.send("Listo").await.unwrap().unwrap();
    assert_eq!(session.message_count(), 1);

    // The echo was already consumed by `send`.
    assert!(session.apply_pending().is_empty());
    assert_eq!(session.message_count(), 1);
    assert_eq!(session.scroll_target(), Some(&sent.id));
    let stored = backend.store.history(session.channel().unwrap(), 10).await.unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn test_sending_without_polling_stays_live() {
    let (backend, _data_temp) = create_test_backend().await;
    let small = Backend::with_database(backend.database.clone(), 2);
    let mut session = ChatSession::open(
        with_teacher(),
        Some(pid("s1")),
        small.store.clone(),
        small.bus.clone(),
        Arc::new(SessionIdentity::pending()),
        50,
    )
    .await;

    for n in 0..5 {
        session.send(&format!("mensaje {n}")).await.unwrap();
    }

    assert_eq!(session.live_status(), LiveStatus::Live);
    assert!(session.error().is_none());
    assert_eq!(session.message_count(), 5);
    assert_eq!(small.bus.active_subscriptions(), 1);
}

#[tokio::test]
async fn test_live_messages_arrive_in_order() {
    let (messaging, _backend, _store, _identity, _data_temp) =
        create_test_messaging(Some("s1")).await;
    let mut student = messaging.open_chat_session(with_teacher(), None).await;
    let mut teacher = messaging
        .open_chat_session(ChannelSpec::WithCounterpart(pid("s1")), Some(pid("t1")))
        .await;
    assert_eq!(student.channel(), teacher.channel());

    let m1 = teacher.send("Primero").await.unwrap().unwrap();
    let m2 = teacher.send("Segundo").await.unwrap().unwrap();

    assert_eq!(
        student.next_update().await,
        Some(SessionUpdate::MessageAppended(m1))
    );
    assert_eq!(
        student.next_update().await,
        Some(SessionUpdate::MessageAppended(m2))
    );
    assert_eq!(contents(&student), vec!["Primero", "Segundo"]);
    assert_eq!(
        student.scroll_target().map(MessageId::as_str),
        teacher.scroll_target().map(MessageId::as_str)
    );
}

#[tokio::test]
async fn test_other_channels_are_not_delivered() {
    let (messaging, backend, _store, _identity, _data_temp) =
        create_test_messaging(Some("s1")).await;
    let mut session = messaging.open_chat_session(with_teacher(), None).await;

    backend
        .store
        .append(&ChannelId::direct(&pid("s2"), &pid("t1")), &pid("t1"), "no es para ti")
        .await
        .unwrap();
    backend
        .store
        .append(&ChannelId::named("general"), &pid("t1"), "Aviso")
        .await
        .unwrap();

    assert!(session.apply_pending().is_empty());
    assert_eq!(session.message_count(), 0);
}

#[tokio::test]
async fn test_pending_identity_then_retry() {
    let (messaging, _backend, store, identity, _data_temp) = create_test_messaging(None).await;
    let mut session = messaging.open_chat_session(with_teacher(), None).await;

    assert_eq!(session.state(), SessionState::Loading);
    assert_eq!(session.error(), Some(&ConversationError::IdentityPending));
    assert_eq!(session.viewer(), None);
    assert_eq!(
        session.send("hola").await,
        Err(ConversationError::IdentityPending)
    );
    assert_eq!(store.append_calls(), 0);

    identity.sign_in(pid("s1")).unwrap();
    session.retry_load().await.unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.viewer(), Some(&pid("s1")));
    assert!(session.error().is_none());
    assert!(session.send("hola").await.unwrap().is_some());
}

#[tokio::test]
async fn test_load_failure_then_retry() {
    let (messaging, backend, store, _identity, _data_temp) =
        create_test_messaging(Some("s1")).await;
    store.set_fail_reads(true);

    let mut session = messaging.open_chat_session(with_teacher(), None).await;

    assert_eq!(session.state(), SessionState::Loading);
    assert!(matches!(session.error(), Some(ConversationError::LoadFailed(_))));
    assert_eq!(session.live_status(), LiveStatus::Idle);
    assert_eq!(backend.bus.active_subscriptions(), 0);
    assert!(matches!(
        session.send("hola").await,
        Err(ConversationError::LoadFailed(_))
    ));

    store.set_fail_reads(false);
    session.retry_load().await.unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.live_status(), LiveStatus::Live);
    assert_eq!(backend.bus.active_subscriptions(), 1);
}

#[tokio::test]
async fn test_lost_subscription_pauses_until_retry() {
    let (backend, _data_temp) = create_test_backend().await;
    let bus = Arc::new(MessageBus::with_buffer_size(1));
    let mut session = ChatSession::open(
        ChannelSpec::Named("general".to_string()),
        Some(pid("s1")),
        backend.store.clone(),
        bus.clone(),
        Arc::new(SessionIdentity::pending()),
        50,
    )
    .await;

    for n in 0..3 {
        bus.emit(&Message {
            id: MessageId::new(format!("m{n}")),
            channel: ChannelId::named("general"),
            sender: pid("t1"),
            content: format!("aviso {n}"),
            created_at: Utc::now(),
        });
    }

    let update = session.next_update().await.unwrap();
    assert!(matches!(
        update,
        SessionUpdate::LivePaused(ConversationError::SubscriptionLost(_))
    ));
    assert_eq!(session.live_status(), LiveStatus::Paused);
    assert!(matches!(
        session.error(),
        Some(ConversationError::SubscriptionLost(_))
    ));
    assert_eq!(bus.active_subscriptions(), 0);
    assert!(session.next_update().await.is_none());

    session.retry_load().await.unwrap();
    assert_eq!(session.live_status(), LiveStatus::Live);
    assert_eq!(bus.active_subscriptions(), 1);
}

#[tokio::test]
async fn test_close_releases_subscription() {
    let (messaging, backend, _store, _identity, _data_temp) =
        create_test_messaging(Some("s1")).await;
    let mut session = messaging.open_chat_session(with_teacher(), None).await;
    session.send("adiós").await.unwrap();
    assert_eq!(backend.bus.active_subscriptions(), 1);

    session.close();

    assert_eq!(backend.bus.active_subscriptions(), 0);
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.message_count(), 0);
    assert_eq!(session.send("hola").await, Err(ConversationError::Closed));
    assert_eq!(session.retry_load().await, Err(ConversationError::Closed));
    assert!(session.next_update().await.is_none());
}

#[tokio::test]
async fn test_dropping_session_releases_subscription() {
    let (messaging, backend, _store, _identity, _data_temp) =
        create_test_messaging(Some("s1")).await;
    {
        let _session = messaging.open_chat_session(with_teacher(), None).await;
        assert_eq!(backend.bus.active_subscriptions(), 1);
    }
    assert_eq!(backend.bus.active_subscriptions(), 0);
}
