//! # Push Channel
//!
//! `GET /ws` upgrades to a WebSocket and registers it with the channel hub.
//! One task forwards hub traffic (direct pushes and broadcasts) to the
//! socket; the connection task reads client frames and answers them.

use crate::channels::events::{ClientEvent, ServerEvent};
use crate::channels::ChannelHandle;
use crate::db::models::CeremonyMode;
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let ChannelHandle {
        channel_id,
        mut direct,
        mut broadcast,
    } = state.hub.register().await;
    tracing::info!(channel_id = %channel_id, "Client connected");

    let (mut sender, mut receiver) = socket.split();

    let writer_channel = channel_id.clone();
    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                Some(frame) = direct.recv() => frame,
                result = broadcast.recv() => match result {
                    Ok(frame) => frame,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(channel_id = %writer_channel, skipped, "Channel fell behind on broadcasts");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        tracing::debug!(channel_id = %writer_channel, "Writer task ended");
    });

    let hello = ServerEvent::Connected {
        channel_id: channel_id.clone(),
    };
    if let Err(e) = state.hub.emit_to(&channel_id, &hello).await {
        tracing::warn!(channel_id = %channel_id, "Could not greet client: {}", e);
    }

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => {
                let reply = match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => respond(&state, &channel_id, event).await,
                    Err(e) => {
                        tracing::debug!(channel_id = %channel_id, "Unparseable frame: {}", e);
                        Some(ServerEvent::Error {
                            message: "Unrecognised message".to_string(),
                        })
                    }
                };
                if let Some(reply) = reply {
                    if let Err(e) = state.hub.emit_to(&channel_id, &reply).await {
                        tracing::warn!(channel_id = %channel_id, "Reply not delivered: {}", e);
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Pending sessions keep pointing at this channel; the poll path covers
    // a client that reconnects under a new id.
    state.hub.unregister(&channel_id).await;
    writer.abort();
    tracing::info!(channel_id = %channel_id, "Client disconnected");
}

/// The reply (if any) to one client frame.
async fn respond(state: &AppState, channel_id: &str, event: ClientEvent) -> Option<ServerEvent> {
    match event {
        ClientEvent::RequestQr {
            username,
            is_registration,
        } => {
            let mode = if is_registration {
                CeremonyMode::Registration
            } else {
                CeremonyMode::Authentication
            };
            match state.sessions.create(&username, mode, Some(channel_id)).await {
                Ok(session) => {
                    let url = state
                        .config
                        .pairing_url(&session.session_id, &username, is_registration);
                    tracing::info!(channel_id, session_id = %session.session_id, username = %username, "QR requested");
                    Some(ServerEvent::QrGenerated {
                        url,
                        session_id: session.session_id,
                        is_registration,
                    })
                }
                Err(e) => {
                    tracing::error!(channel_id, "QR generation failed: {}", e);
                    Some(ServerEvent::Error {
                        message: "Failed to generate QR code".to_string(),
                    })
                }
            }
        }
        ClientEvent::Associate { username, device_id } => {
            match state
                .ceremonies
                .associate_browser(&username, &device_id, channel_id)
                .await
            {
                Ok(true) => Some(ServerEvent::AssociationConfirmed { username, device_id }),
                Ok(false) => None,
                Err(e) => {
                    tracing::error!(channel_id, username = %username, "Association failed: {}", e);
                    None
                }
            }
        }
        ClientEvent::Heartbeat { .. } => Some(ServerEvent::HeartbeatResponse {
            timestamp: Utc::now().timestamp_millis(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ceremony::types::BeginCeremonyRequest;
    use crate::config::Config;

    #[tokio::test]
    async fn request_qr_binds_session_to_channel() {
        let state = AppState::for_tests(Config::for_tests()).await;
        let reply = respond(
            &state,
            "chan-1",
            ClientEvent::RequestQr {
                username: "alice".into(),
                is_registration: true,
            },
        )
        .await;

        let Some(ServerEvent::QrGenerated { url, session_id, is_registration }) = reply else {
            panic!("expected qrGenerated, got {:?}", reply);
        };
        assert!(is_registration);
        assert!(url.ends_with("?username=alice&register=true"));
        let session = state.sessions.get(&session_id).await.unwrap();
        assert_eq!(session.channel_id, "chan-1");
        assert_eq!(session.mode, CeremonyMode::Registration);
    }

    #[tokio::test]
    async fn associate_confirms_only_known_users() {
        let config = Config {
            lenient_sessions: true,
            ..Config::for_tests()
        };
        let state = AppState::for_tests(config).await;
        let event = || ClientEvent::Associate {
            username: "alice".into(),
            device_id: "browser-1".into(),
        };
        assert!(respond(&state, "chan-1", event()).await.is_none());

        // Begin creates the user record
        state
            .ceremonies
            .begin_registration(&BeginCeremonyRequest {
                username: "alice".into(),
                session_id: "s-1".into(),
                is_android_chrome: false,
            })
            .await
            .unwrap();

        let reply = respond(&state, "chan-1", event()).await;
        assert_eq!(
            reply,
            Some(ServerEvent::AssociationConfirmed {
                username: "alice".into(),
                device_id: "browser-1".into()
            })
        );
    }

    #[tokio::test]
    async fn heartbeat_answers() {
        let state = AppState::for_tests(Config::for_tests()).await;
        let reply = respond(&state, "c", ClientEvent::Heartbeat { timestamp: None }).await;
        assert!(matches!(reply, Some(ServerEvent::HeartbeatResponse { .. })));
    }
}
