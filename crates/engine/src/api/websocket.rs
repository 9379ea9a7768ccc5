//! WebSocket handling for player connections.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use langomni_domain::ActorId;
use langomni_shared::{ActionPayload, ClientMessage, ErrorCode, ServerMessage};

use crate::api::http::ApiError;
use crate::app::App;
use crate::use_cases::dispatch::DispatchError;

/// Per-connection outbound buffer.
const CONNECTION_CHANNEL_BUFFER: usize = 256;

/// WebSocket upgrade handler - entry point for new connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app): State<Arc<App>>,
    Path(actor_id): Path<String>,
) -> Result<Response, ApiError> {
    let actor_id = ActorId::new(actor_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, app, actor_id)))
}

async fn handle_socket(socket: WebSocket, app: Arc<App>, actor_id: ActorId) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(CONNECTION_CHANNEL_BUFFER);

    let connection_id = app.connections.connect(tx.clone(), actor_id.clone()).await;
    reply(
        &tx,
        ServerMessage::Connected {
            message: format!("Welcome to LangOmni Adventure, {actor_id}!"),
            player_id: actor_id.to_string(),
        },
    );

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to serialize server message"),
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(msg) => handle_message(msg, &app, &actor_id, &tx).await,
                Err(e) => {
                    tracing::warn!(actor_id = %actor_id, error = %e, "Failed to parse message");
                    reply(
                        &tx,
                        ServerMessage::error(
                            ErrorCode::ParseError,
                            format!("Invalid message format: {e}"),
                        ),
                    );
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!(actor_id = %actor_id, "WebSocket closed by client");
                break;
            }
            Err(e) => {
                tracing::warn!(actor_id = %actor_id, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    if let Err(e) = app.connections.disconnect(connection_id, &actor_id).await {
        tracing::debug!(connection_id = %connection_id, error = %e, "Connection already removed");
    }
    send_task.abort();
    app.connections
        .broadcast(ServerMessage::PlayerDisconnected {
            player_id: actor_id.to_string(),
        })
        .await;

    tracing::info!(connection_id = %connection_id, actor_id = %actor_id, "WebSocket connection terminated");
}

async fn handle_message(
    msg: ClientMessage,
    app: &App,
    actor_id: &ActorId,
    tx: &mpsc::Sender<ServerMessage>,
) {
    match msg {
        ClientMessage::Ping => reply(tx, ServerMessage::Pong),

        ClientMessage::Action {
            data:
                ActionPayload {
                    action_type,
                    action_data,
                },
        } => {
            reply(
                tx,
                ServerMessage::ActionReceived {
                    action_type: action_type.clone(),
                },
            );
            let response = match app
                .dispatcher
                .process_action(actor_id.as_str(), &action_type, action_data)
                .await
            {
                Ok(result) => ServerMessage::ActionResult { result },
                Err(e @ DispatchError::RateLimited { .. }) => {
                    ServerMessage::error(ErrorCode::RateLimited, e.to_string())
                }
                Err(e @ DispatchError::InvalidRequest(_)) => {
                    ServerMessage::error(ErrorCode::BadRequest, e.to_string())
                }
            };
            reply(tx, response);
        }

        ClientMessage::Chat { message } => {
            app.connections
                .broadcast(ServerMessage::Chat {
                    player_id: actor_id.to_string(),
                    message,
                })
                .await;
        }
    }
}

fn reply(tx: &mpsc::Sender<ServerMessage>, msg: ServerMessage) {
    if let Err(e) = tx.try_send(msg) {
        tracing::warn!(error = %e, "Failed to queue reply, channel full or closed");
    }
}
