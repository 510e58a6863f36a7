//! Unix-socket front end for `chatstreamd`.
//!
//! Every connection carries one JSON request line tagged by `op`. Most
//! replies are a single JSON line; `follow` instead streams the raw text of
//! the generation and closes the connection when it ends. A follower that
//! closes its side of the socket detaches without disturbing the generation.

use std::future::Future;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::chat::ChatService;
use crate::coordinator::GenerationKey;
use crate::error::SessionError;
use crate::session::{ConsumerSession, RelayOutcome};
use crate::source::GenerationOptions;

/// A request line.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Request {
    Ping,
    Send {
        chat_id: String,
        prompt: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        options: GenerationOptions,
    },
    Follow {
        chat_id: String,
        message_id: String,
    },
    Interrupt {
        message_id: String,
    },
    Message {
        chat_id: String,
        message_id: String,
    },
}

async fn write_json<W>(sink: &mut W, value: &Value) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    sink.write_all(&line).await
}

fn error_reply(err: impl std::fmt::Display) -> Value {
    json!({ "error": err.to_string() })
}

/// Disconnect watcher task, aborted when the follow it belongs to ends.
struct Watcher(JoinHandle<()>);

impl Drop for Watcher {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Cancel `token` once the peer closes its side of the connection.
fn watch_disconnect(mut reader: BufReader<OwnedReadHalf>, token: CancellationToken) -> Watcher {
    Watcher(tokio::spawn(async move {
        let mut buf = [0u8; 64];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        debug!("follower disconnected");
        token.cancel();
    }))
}

#[derive(Clone)]
pub struct Server {
    chat: ChatService,
    session: ConsumerSession,
}

impl Server {
    /// Serve `chat` and relay its generations to followers.
    pub fn new(chat: ChatService) -> Self {
        let session = ConsumerSession::new(chat.coordinator().clone());
        Self { chat, session }
    }

    /// Serve requests on `socket` until `shutdown` resolves.
    ///
    /// Shutdown stops accepting and detaches live followers. Generations in
    /// flight are left to their own tasks.
    pub async fn run(
        self,
        socket: PathBuf,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<()> {
        if socket.exists() {
            tokio::fs::remove_file(&socket).await.ok();
        }
        let listener = UnixListener::bind(&socket)?;
        info!(?socket, "chatstreamd listening");

        let stop = CancellationToken::new();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let server = self.clone();
                    let cancel = stop.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, cancel).await {
                            error!(error = %e, "connection failed");
                        }
                    });
                }
            }
        }

        stop.cancel();
        tokio::fs::remove_file(&socket).await.ok();
        info!(?socket, "chatstreamd stopped");
        Ok(())
    }

    async fn handle_connection(
        &self,
        stream: UnixStream,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let request: Request = match serde_json::from_str(line.trim()) {
            Ok(req) => req,
            Err(e) => {
                write_json(&mut write_half, &error_reply(format!("invalid request: {e}"))).await?;
                return Ok(());
            }
        };
        debug!(?request, "request received");

        match request {
            Request::Ping => write_json(&mut write_half, &json!({ "ok": true })).await?,
            Request::Send {
                chat_id,
                prompt,
                model,
                options,
            } => {
                let reply = match self.chat.send(&chat_id, &prompt, model, options).await {
                    Ok(started) => json!({
                        "chat_id": started.key.chat_id,
                        "message_id": started.key.message_id,
                    }),
                    Err(e) => error_reply(e),
                };
                write_json(&mut write_half, &reply).await?;
            }
            Request::Follow {
                chat_id,
                message_id,
            } => {
                let key = GenerationKey::new(chat_id, message_id);
                self.follow(&key, reader, &mut write_half, cancel).await?;
            }
            Request::Interrupt { message_id } => {
                let reply = match self.chat.interrupt(&message_id) {
                    Some(partial) => json!({ "interrupted": true, "partial": partial }),
                    None => json!({ "interrupted": false }),
                };
                write_json(&mut write_half, &reply).await?;
            }
            Request::Message {
                chat_id,
                message_id,
            } => {
                let store = self.chat.coordinator().store();
                let reply = match store.get_message(&chat_id, &message_id).await {
                    Ok(Some(message)) => serde_json::to_value(message)?,
                    Ok(None) => error_reply(format!("no message {message_id} in chat {chat_id}")),
                    Err(e) => error_reply(e),
                };
                write_json(&mut write_half, &reply).await?;
            }
        }
        write_half.shutdown().await.ok();
        Ok(())
    }

    async fn follow<W>(
        &self,
        key: &GenerationKey,
        reader: BufReader<OwnedReadHalf>,
        sink: &mut W,
        cancel: CancellationToken,
    ) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let store = self.chat.coordinator().store();
        if let Some(message) = store.get_message(&key.chat_id, &key.message_id).await? {
            if !message.is_generating {
                sink.write_all(message.content.as_bytes()).await?;
                return Ok(());
            }
        }

        let session_cancel = cancel.child_token();
        let _watcher = watch_disconnect(reader, session_cancel.clone());
        match self.session.relay(key, sink, &session_cancel).await {
            Ok(RelayOutcome::Cancelled { chunks }) => {
                debug!(generation = %key, chunks, "follower detached");
            }
            Ok(outcome) => debug!(generation = %key, ?outcome, "follow ended"),
            Err(SessionError::Io(e)) => debug!(generation = %key, error = %e, "follower went away"),
            Err(e @ SessionError::MessageNotFound { .. }) => {
                write_json(sink, &error_reply(e)).await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn peer_close_cancels_follow() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let (read_half, _write_half) = ours.into_split();
        let token = CancellationToken::new();
        let _watcher = watch_disconnect(BufReader::new(read_half), token.clone());

        drop(theirs);
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_watcher_stops_watching() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let (read_half, _write_half) = ours.into_split();
        let token = CancellationToken::new();
        drop(watch_disconnect(BufReader::new(read_half), token.clone()));

        drop(theirs);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!token.is_cancelled());
    }

    #[test]
    fn requests_are_tagged_by_op() {
        let req: Request =
            serde_json::from_str(r#"{"op":"interrupt","message_id":"m1"}"#).unwrap();
        assert!(matches!(req, Request::Interrupt { message_id } if message_id == "m1"));
        let req: Request = serde_json::from_str(r#"{"op":"send","chat_id":"c","prompt":"hi"}"#).unwrap();
        assert!(matches!(req, Request::Send { model: None, .. }));
    }
}
