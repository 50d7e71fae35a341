//! WebSocket control plane: subscribe/unsubscribe over `/ws`

use super::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

/// Query parameters accepted at connect time
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Legacy initial subscription: treated as `"<mint>,subscribe"`.
    pub token: Option<String>,
}

/// Inbound frame: `"<mint>,<action>"`, action case-insensitive
fn parse_command(text: &str) -> Result<(String, Action), String> {
    let mut parts = text.splitn(2, ',');
    let mint = parts.next().unwrap_or("").trim();
    let action = parts.next().unwrap_or("").trim();

    if mint.is_empty() || action.is_empty() {
        return Err(format!(
            "expected \"<mint>,<action>\", got \"{}\"",
            text.trim()
        ));
    }

    match action.to_lowercase().as_str() {
        "subscribe" => Ok((mint.to_string(), Action::Subscribe)),
        "unsubscribe" => Ok((mint.to_string(), Action::Unsubscribe)),
        other => Err(format!("unknown action \"{}\"", other)),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Action {
    Subscribe,
    Unsubscribe,
}

/// Handle WebSocket upgrade
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

async fn handle_socket(socket: WebSocket, state: AppState, params: WsQuery) {
    let id = Uuid::new_v4();
    info!(connection = %id, "websocket connected");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    state.hub.register(id, tx).await;

    // Legacy connect-time subscription.
    if let Some(token) = params.token {
        state.hub.subscribe(id, &token).await;
    }

    // Single writer per connection: all frames leave through this task.
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(Message::Text(message)).await.is_err() {
                break;
            }
        }
    });

    let hub = state.hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => match parse_command(&text) {
                    Ok((mint, Action::Subscribe)) => hub.subscribe(id, &mint).await,
                    Ok((mint, Action::Unsubscribe)) => hub.unsubscribe(id, &mint).await,
                    Err(detail) => hub.reject_message(id, &detail).await,
                },
                Message::Close(_) => break,
                // Pings are answered at the protocol level.
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.hub.disconnect(id).await;
    debug!(connection = %id, "websocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_case_insensitively() {
        let (mint, action) = parse_command("Mint111,subscribe").unwrap();
        assert_eq!(mint, "Mint111");
        assert_eq!(action, Action::Subscribe);

        let (_, action) = parse_command("Mint111,UNSUBSCRIBE").unwrap();
        assert_eq!(action, Action::Unsubscribe);

        let (_, action) = parse_command(" Mint111 , Subscribe ").unwrap();
        assert_eq!(action, Action::Subscribe);
    }

    #[test]
    fn malformed_commands_are_rejected() {
        assert!(parse_command("").is_err());
        assert!(parse_command("justamint").is_err());
        assert!(parse_command("mint,").is_err());
        assert!(parse_command(",subscribe").is_err());
        assert!(parse_command("mint,resubscribe").is_err());
    }
}
