use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::{api::AppState, auth::Principal, challenge::models::SessionOwner, error::ApiError};

const ACK: &str = r#"{"message":"working..."}"#;

#[derive(Debug, Deserialize)]
pub struct LiveParams {
    #[serde(default)]
    i_token: Option<String>,
}

/// Upgrades to the session's live channel once the token checks out.
pub async fn connect(
    State(state): State<AppState>,
    Query(params): Query<LiveParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let owner = match params
        .i_token
        .as_deref()
        .ok_or(ApiError::Unauthorized)
        .and_then(|token| state.verifier.verify(token))
        .and_then(|claims| match claims.principal() {
            Some(Principal::Session(owner)) => Ok(owner),
            _ => Err(ApiError::Unauthorized),
        }) {
        Ok(owner) => owner,
        Err(err) => return err.into_response(),
    };

    match upgrade {
        Ok(ws) => ws.on_upgrade(move |socket| serve(socket, state, owner)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn serve(socket: WebSocket, state: AppState, owner: SessionOwner) {
    let key = owner.channel_key();
    let registration = state.registry.register(&key);
    let connection_id = registration.id;
    let mut inbox = registration.inbox;
    state.metrics.connection_opened();
    tracing::info!(session = %key, connection_id, "live channel opened");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            outgoing = inbox.recv() => {
                let Some(payload) = outgoing else {
                    // replaced by a newer connection for the same session
                    break;
                };
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(_))) => {
                    if sink.send(Message::Text(ACK.into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(session = %key, error = %err, "live channel read failed");
                    break;
                }
            },
        }
    }

    state.registry.release(&key, connection_id);
    state.metrics.connection_closed();
    tracing::info!(session = %key, connection_id, "live channel closed");
}
