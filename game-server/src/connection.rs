//! Per-connection plumbing. Every socket gets a reader and a writer
//! task; the reader forwards typed frames to the engine through the
//! shared bounded queue (awaiting capacity is the backpressure), the
//! writer drains the client's outbound queue. When either side dies the
//! other is aborted and the engine learns about the disconnect.

use crate::engine_task::EngineMessage;
use crate::registry::ClientId;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::{CHANNEL_BUFFER_SIZE, ClientFrame, ServerFrame};
use tokio::sync::mpsc;

/// Drives one client connection from accept to disconnect.
pub async fn run(stream: WebSocket, client: ClientId, engine: mpsc::Sender<EngineMessage>) {
    // By splitting, we can send and receive at the same time.
    let (sender, receiver) = stream.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<ServerFrame>(CHANNEL_BUFFER_SIZE);

    if engine
        .send(EngineMessage::Connect { client, outbound: outbound_tx.clone() })
        .await
        .is_err()
    {
        tracing::error!(client, "Engine is gone, refusing the connection.");
        return;
    }

    let mut send_task = tokio::spawn(async move { write_frames(sender, outbound_rx).await });
    let engine_inbound = engine.clone();
    let mut receive_task = tokio::spawn(async move {
        read_frames(receiver, client, engine_inbound, outbound_tx).await
    });

    // If any one of the tasks runs to completion, we abort the other.
    let reason = tokio::select! {
        res = &mut send_task => { receive_task.abort(); res }
        res = &mut receive_task => { send_task.abort(); res }
    };
    let reason = reason.unwrap_or("connection task panicked");
    tracing::info!(client, reason, "Connection closed.");

    let _ = engine.send(EngineMessage::Disconnect { client }).await;
}

/// Drains the outbound queue onto the socket as JSON text frames.
async fn write_frames(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerFrame>,
) -> &'static str {
    while let Some(frame) = outbound.recv().await {
        let encoded = match serde_json::to_string(&frame) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(error = %e, "Unencodable outbound frame.");
                continue;
            }
        };
        if sender.send(Message::Text(encoded.into())).await.is_err() {
            return "write failed";
        }
    }
    // The engine dropped the outbound handle, e.g. because another
    // connection took over this player.
    let _ = sender.send(Message::Close(None)).await;
    "outbound queue closed"
}

/// Reads socket frames and forwards them as typed messages. Malformed
/// JSON is answered directly on the client's own outbound queue.
async fn read_frames(
    mut receiver: SplitStream<WebSocket>,
    client: ClientId,
    engine: mpsc::Sender<EngineMessage>,
    outbound: mpsc::Sender<ServerFrame>,
) -> &'static str {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(frame) => {
                    // Awaiting the bounded queue is the backpressure:
                    // while the engine is busy, this task pauses reads.
                    if engine
                        .send(EngineMessage::Frame { client, frame })
                        .await
                        .is_err()
                    {
                        return "engine stopped";
                    }
                }
                Err(e) => {
                    let _ = outbound
                        .send(ServerFrame::Error { text: format!("Unreadable frame: {e}") })
                        .await;
                }
            },
            Ok(Message::Close(_)) => return "client closed",
            // Ping/pong and binary noise are ignored.
            Ok(_) => {}
            Err(_) => return "transport error",
        }
    }
    "stream ended"
}
