use crate::types::{
    Blob, ClientMessage, FunctionResponse, RealtimeInput, ServerEvent, ServerMessage, Setup,
    ToolResponse,
};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::CloseFrame,
    tungstenite::protocol::Message,
};

pub(crate) mod config;
pub(crate) mod consts;

type WsReader = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub type ServerRx = mpsc::Receiver<ServerEvent>;

enum Outbound {
    Message(ClientMessage),
    Close,
}

/// A live Gemini session. Outbound messages go through a writer task, inbound
/// frames are parsed by a reader task and forwarded as [`ServerEvent`]s.
pub struct GeminiClient {
    c_tx: mpsc::Sender<Outbound>,
    events: Option<ServerRx>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Connects, sends `setup` and resolves once the server acknowledges it.
pub async fn connect(config: &config::Config, setup: Setup) -> Result<GeminiClient> {
    let (ws_stream, _) = connect_async(config.url())
        .await
        .context("Failed to connect to Gemini WebSocket")?;
    tracing::info!("Connected to Gemini Live, sending setup for {}.", setup.model);

    let (mut write, mut read) = ws_stream.split();
    let setup = serde_json::to_string(&ClientMessage::Setup(setup))?;
    write
        .send(Message::Text(setup))
        .await
        .context("Failed to send setup message")?;

    tokio::time::timeout(consts::SETUP_TIMEOUT, await_setup_complete(&mut read))
        .await
        .context("Timed out waiting for the setup acknowledgement")??;
    tracing::info!("Gemini session setup complete.");

    let (c_tx, mut c_rx) = mpsc::channel::<Outbound>(consts::CHANNEL_CAPACITY);
    let (s_tx, s_rx) = mpsc::channel::<ServerEvent>(consts::CHANNEL_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(outbound) = c_rx.recv().await {
            match outbound {
                Outbound::Message(message) => match serde_json::to_string(&message) {
                    Ok(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::error!("failed to send message: {}", e);
                            break;
                        }
                    }
                    Err(e) => tracing::error!("failed to serialize message: {}", e),
                },
                Outbound::Close => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        tracing::debug!("failed to send close frame: {}", e);
                    }
                    break;
                }
            }
        }
        let _ = write.close().await;
    });

    let reader = tokio::spawn(async move {
        while let Some(message) = read.next().await {
            let message = match message {
                Err(e) => {
                    tracing::error!("failed to read message: {}", e);
                    let _ = s_tx.send(ServerEvent::Error(e.to_string())).await;
                    return;
                }
                Ok(message) => message,
            };
            let parsed = match message {
                Message::Text(text) => parse_frame(text.as_bytes()),
                // The Live API sends its JSON in binary frames as often as text.
                Message::Binary(bin) => parse_frame(&bin),
                Message::Close(frame) => {
                    tracing::info!("connection closed: {:?}", frame);
                    let reason = close_reason(frame);
                    let _ = s_tx.send(ServerEvent::Closed { reason }).await;
                    return;
                }
                _ => continue,
            };
            if let Some(server_message) = parsed {
                if s_tx.send(ServerEvent::Message(server_message)).await.is_err() {
                    tracing::debug!("server event receiver dropped");
                    return;
                }
            }
        }
        let _ = s_tx.send(ServerEvent::Closed { reason: None }).await;
    });

    Ok(GeminiClient {
        c_tx,
        events: Some(s_rx),
        reader,
        writer,
    })
}

async fn await_setup_complete(read: &mut WsReader) -> Result<()> {
    while let Some(message) = read.next().await {
        let parsed = match message.context("Error reading setup acknowledgement")? {
            Message::Text(text) => parse_frame(text.as_bytes()),
            Message::Binary(bin) => parse_frame(&bin),
            Message::Close(frame) => {
                let reason = close_reason(frame).unwrap_or_else(|| "no reason given".to_string());
                anyhow::bail!("Gemini closed the connection during setup: {}", reason);
            }
            _ => continue,
        };
        match parsed {
            Some(message) if message.setup_complete.is_some() => return Ok(()),
            Some(_) => tracing::debug!("Ignoring message received before setup completed."),
            None => {}
        }
    }
    anyhow::bail!("Gemini connection ended before setup completed")
}

fn parse_frame(bytes: &[u8]) -> Option<ServerMessage> {
    match serde_json::from_slice::<ServerMessage>(bytes) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::error!(
                "failed to deserialize server message: {}, text=> {:?}",
                e,
                String::from_utf8_lossy(bytes)
            );
            None
        }
    }
}

fn close_reason(frame: Option<CloseFrame<'_>>) -> Option<String> {
    frame.and_then(|f| {
        let reason = f.reason.trim();
        if reason.is_empty() {
            None
        } else {
            Some(format!("{} ({})", reason, u16::from(f.code)))
        }
    })
}

impl GeminiClient {
    /// Takes the server event receiver. Only the first call succeeds.
    pub fn server_events(&mut self) -> Result<ServerRx> {
        self.events
            .take()
            .context("server_events channel has already been taken")
    }

    async fn send(&self, message: ClientMessage) -> Result<()> {
        self.c_tx
            .send(Outbound::Message(message))
            .await
            .map_err(|_| anyhow::anyhow!("Gemini connection is closed"))
    }

    /// Streams one chunk of microphone audio.
    pub async fn send_realtime_input(&self, chunk: Blob) -> Result<()> {
        self.send(ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![chunk],
        }))
        .await
        .context("Failed to send audio chunk")
    }

    pub async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> Result<()> {
        self.send(ClientMessage::ToolResponse(ToolResponse {
            function_responses: responses,
        }))
        .await
        .context("Failed to send tool response")
    }

    /// Sends a close frame and waits for the reader to see the socket end.
    pub async fn close(self) -> Result<()> {
        let Self {
            c_tx,
            mut reader,
            mut writer,
            ..
        } = self;

        if c_tx.send(Outbound::Close).await.is_err() {
            tracing::debug!("writer already stopped before close");
        }
        drop(c_tx);

        match tokio::time::timeout(consts::CLOSE_TIMEOUT, &mut writer).await {
            Ok(joined) => joined.context("Gemini writer task failed")?,
            Err(_) => {
                tracing::warn!("Gemini writer did not stop in time, aborting.");
                writer.abort();
            }
        }
        match tokio::time::timeout(consts::CLOSE_TIMEOUT, &mut reader).await {
            Ok(joined) => joined.context("Gemini reader task failed")?,
            Err(_) => {
                tracing::warn!("Gemini reader did not stop in time, aborting.");
                reader.abort();
            }
        }
        tracing::info!("Gemini connection closed.");
        Ok(())
    }
}
