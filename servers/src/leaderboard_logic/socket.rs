use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::SinkExt;
use futures_util::stream::SplitSink;
use lib_ranking::engine::ChannelError;
use lib_ranking::OutboundChannel;
use tokio::sync::Mutex;

/// Write half of an upgraded WebSocket, registered with the broadcaster.
/// Snapshots go out as text frames.
pub struct WsChannel {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsChannel {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }
}

#[async_trait]
impl OutboundChannel for WsChannel {
    async fn write(&self, payload: Bytes) -> Result<(), ChannelError> {
        let text = String::from_utf8(payload.to_vec())
            .map_err(|e| ChannelError::Write(e.to_string()))?;
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ChannelError::Write(e.to_string()))
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    }
}
