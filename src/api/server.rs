//! WebSocket server for remote control
//!
//! Clients send `{type, payload}` commands; each one is applied to the shared project
//! and answered on the same connection. Connections hold no state of their own.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use super::handlers::CommandHandler;
use super::protocol::ServerMessage;
use crate::project::SharedProject;

/// Default control port
pub const DEFAULT_PORT: u16 = 8080;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// WebSocket server bound to a port
pub struct ControlServer {
    listener: TcpListener,
    addr: SocketAddr,
    handler: CommandHandler,
}

impl ControlServer {
    /// Bind the listener. Port 0 picks a free port.
    pub async fn bind(project: SharedProject, addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        Ok(Self {
            listener,
            addr,
            handler: CommandHandler::new(project),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accept connections until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        log::info!("Control server listening on ws://{}", self.addr);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let handler = self.handler.clone();
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, peer, handler, shutdown).await
                                {
                                    log::error!("Error handling WebSocket connection from {}: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => log::warn!("Failed to accept connection: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        log::info!("Control server stopped");
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: CommandHandler,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let client_id = Uuid::new_v4();
    log::info!("New WebSocket connection from {} (id: {})", peer, client_id);

    let (mut write, mut read) = ws_stream.split();
    write
        .send(Message::Text(ServerMessage::connected().to_json()))
        .await?;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handler.handle_text(&text).await;
                        write.send(Message::Text(reply.to_json())).await?;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let reply = ServerMessage::error("binary messages are not supported");
                        write.send(Message::Text(reply.to_json())).await?;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Client {} disconnected", client_id);
                        break;
                    }
                    Some(Err(e)) => {
                        log::error!("WebSocket error for client {}: {}", client_id, e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Project;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let project = Project::default().into_shared();
        let server = ControlServer::bind(project, SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }
}
