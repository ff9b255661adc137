// WebSocket client for the chat platform gateway bridge.
//
// Inbound frames are decoded into `GatewayEvent`s and forwarded to the app
// loop; `GatewayAction`s from the app loop are encoded and written back.

use std::future::Future;

use anyhow::{bail, Context};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use crate::protocol::{GatewayAction, GatewayEvent};

/// Why the inbound side of the connection stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The bridge closed the connection or the stream ended.
    Closed,
    /// A transport error ended the stream.
    Failed(String),
    /// The app loop dropped its receiver.
    AppStopped,
}

/// Connect, identify, and pump frames until the connection ends.
///
/// Returns `Ok(())` only when the app loop stops first. Losing the
/// connection is an error; nothing is retried.
pub async fn run(
    url: &str,
    token: &str,
    event_tx: mpsc::Sender<GatewayEvent>,
    action_rx: mpsc::Receiver<GatewayAction>,
) -> anyhow::Result<()> {
    let (ws_stream, _) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect to gateway at {url}"))?;
    info!("Connected to gateway at {url}");

    let (mut write, read) = ws_stream.split();
    send_action(
        &mut write,
        &GatewayAction::Identify {
            token: token.to_string(),
        },
    )
    .await
    .context("failed to send identify frame")?;

    let writer = tokio::spawn(forward_actions(write, action_rx));
    supervise(process_message_stream(read, &event_tx), writer).await
}

/// Wait for whichever half of the connection stops first. A failing writer
/// is as fatal as a failing reader.
pub async fn supervise<R>(
    reader: R,
    mut writer: JoinHandle<anyhow::Result<()>>,
) -> anyhow::Result<()>
where
    R: Future<Output = ReadOutcome>,
{
    let outcome = tokio::select! {
        outcome = reader => outcome,
        joined = &mut writer => match joined {
            Ok(Ok(())) => ReadOutcome::AppStopped,
            Ok(Err(e)) => return Err(e.context("gateway writer failed")),
            Err(e) => bail!("gateway writer task ended abnormally: {e}"),
        },
    };
    writer.abort();

    match outcome {
        ReadOutcome::AppStopped => {
            info!("Application stopped, closing gateway connection");
            Ok(())
        }
        ReadOutcome::Closed => bail!("gateway connection closed"),
        ReadOutcome::Failed(e) => bail!("gateway connection failed: {e}"),
    }
}

/// Decode inbound frames from any [`Stream`] and forward them through
/// `event_tx`. Frames that do not decode are logged and dropped.
pub async fn process_message_stream<St>(
    mut stream: St,
    event_tx: &mpsc::Sender<GatewayEvent>,
) -> ReadOutcome
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                Ok(event) => {
                    if event_tx.send(event).await.is_err() {
                        return ReadOutcome::AppStopped;
                    }
                }
                Err(e) => warn!("Dropping unreadable gateway frame: {e}"),
            },
            Ok(Message::Close(frame)) => {
                info!("Gateway sent close frame: {:?}", frame);
                return ReadOutcome::Closed;
            }
            Err(e) => {
                warn!("Gateway connection error: {e}");
                return ReadOutcome::Failed(e.to_string());
            }
            Ok(other) => debug!("Ignoring non-text frame ({} bytes)", other.len()),
        }
    }
    ReadOutcome::Closed
}

/// Encode every action from `action_rx` and write it to `sink`, in order.
pub async fn forward_actions<S>(
    mut sink: S,
    mut action_rx: mpsc::Receiver<GatewayAction>,
) -> anyhow::Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    while let Some(action) = action_rx.recv().await {
        send_action(&mut sink, &action).await?;
    }
    debug!("Action channel closed, gateway writer exiting");
    Ok(())
}

async fn send_action<S>(sink: &mut S, action: &GatewayAction) -> anyhow::Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let frame = serde_json::to_string(action).context("failed to encode gateway action")?;
    sink.send(Message::Text(frame.into()))
        .await
        .context("failed to write gateway frame")?;
    Ok(())
}
