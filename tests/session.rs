mod common;

use std::sync::Arc;
use std::time::Duration;

use chatstream::{ConsumerSession, GenerationKey, RelayOutcome, SessionError};
use common::{ChannelSource, ScriptedSource};
use tokio_util::sync::CancellationToken;

fn spawn_relay(
    session: ConsumerSession,
    key: GenerationKey,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<(Result<RelayOutcome, SessionError>, String)> {
    tokio::spawn(async move {
        let mut sink = Vec::new();
        let outcome = session.relay(&key, &mut sink, &cancel).await;
        (outcome, String::from_utf8(sink).unwrap())
    })
}

#[tokio::test]
async fn relays_live_generation_to_the_end() {
    let (coordinator, store, _) = common::coordinator();
    let id = common::placeholder(store.as_ref(), "chat").await;
    let key = GenerationKey::new("chat", id);
    let (source, tx) = ChannelSource::new();
    let handle = coordinator
        .start(key.clone(), Arc::new(source), common::request())
        .unwrap();

    let session = ConsumerSession::new(coordinator.clone());
    let relay = spawn_relay(session, key, CancellationToken::new());
    for chunk in ["one ", "two ", "three"] {
        tx.unbounded_send(Ok(chunk.into())).unwrap();
    }
    drop(tx);

    let (outcome, written) = relay.await.unwrap();
    assert_eq!(outcome.unwrap(), RelayOutcome::Completed { chunks: 3 });
    assert_eq!(written, "one two three");
    handle.await.unwrap();
}

#[tokio::test]
async fn cancelling_one_relay_leaves_the_other() {
    let (coordinator, store, _) = common::coordinator();
    let id = common::placeholder(store.as_ref(), "chat").await;
    let key = GenerationKey::new("chat", id.clone());
    let (source, tx) = ChannelSource::new();
    let handle = coordinator
        .start(key.clone(), Arc::new(source), common::request())
        .unwrap();

    let session = ConsumerSession::new(coordinator.clone());
    let cancel = CancellationToken::new();
    let first = spawn_relay(session.clone(), key.clone(), cancel.clone());
    let second = spawn_relay(session, key, CancellationToken::new());

    tx.unbounded_send(Ok("a".into())).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    let (outcome, _) = first.await.unwrap();
    assert!(matches!(outcome.unwrap(), RelayOutcome::Cancelled { .. }));

    tx.unbounded_send(Ok("b".into())).unwrap();
    drop(tx);
    let (outcome, written) = second.await.unwrap();
    assert_eq!(outcome.unwrap(), RelayOutcome::Completed { chunks: 2 });
    assert_eq!(written, "ab");

    let report = handle.await.unwrap();
    assert_eq!(report.content, "ab");
}

#[tokio::test]
async fn falls_back_to_stored_content() {
    let (coordinator, store, _) = common::coordinator();
    let id = common::placeholder(store.as_ref(), "chat").await;
    let key = GenerationKey::new("chat", id);
    coordinator
        .start(
            key.clone(),
            Arc::new(ScriptedSource::chunks(&["stored ", "reply"])),
            common::request(),
        )
        .unwrap()
        .await
        .unwrap();

    let session = ConsumerSession::new(coordinator);
    let mut sink = Vec::new();
    let outcome = session
        .relay(&key, &mut sink, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, RelayOutcome::FromStore);
    assert_eq!(sink, b"stored reply");
}

#[tokio::test]
async fn unknown_message_is_reported() {
    let (coordinator, _, _) = common::coordinator();
    let session = ConsumerSession::new(coordinator);
    let mut sink = Vec::new();
    let err = session
        .relay(
            &GenerationKey::new("chat", "missing"),
            &mut sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::MessageNotFound { .. }));
    assert!(sink.is_empty());
}
