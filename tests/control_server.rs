use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use projection_mapper::api::{ControlServer, ServerMessage, COMMANDS};
use projection_mapper::project::{LayerType, Project, SharedProject};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start() -> (SharedProject, String, SocketAddr, watch::Sender<bool>) {
    let mut project = Project::default();
    let geometry_id = project.add_geometry(Some("G1"));
    let layer_id = project
        .add_layer(LayerType::Color, &geometry_id, Some("L1"))
        .unwrap();
    let project = project.into_shared();

    let server = ControlServer::bind(project.clone(), SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = server.local_addr();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.run(shutdown_rx));
    (project, layer_id, addr, shutdown_tx)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
        .await
        .unwrap();
    client
}

async fn next_message(client: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for server")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send(client: &mut Client, value: serde_json::Value) -> ServerMessage {
    client.send(Message::Text(value.to_string())).await.unwrap();
    next_message(client).await
}

#[tokio::test]
async fn greets_and_acks_layer_update() {
    let (project, layer_id, addr, _shutdown) = start().await;
    let mut client = connect(addr).await;

    match next_message(&mut client).await {
        ServerMessage::Connected {
            message, commands, ..
        } => {
            assert_eq!(message, "Connected to Projection Mapper");
            assert_eq!(commands.len(), COMMANDS.len());
        }
        other => panic!("expected greeting, got {:?}", other),
    }

    let reply = send(
        &mut client,
        json!({"type": "layer.update", "payload": {"id": layer_id, "updates": {"opacity": 0.5}}}),
    )
    .await;
    match reply {
        ServerMessage::Ack(ack) => assert_eq!(ack.original_type, "layer.update"),
        other => panic!("expected ack, got {:?}", other),
    }
    assert_eq!(project.read().await.layer(&layer_id).unwrap().opacity, 0.5);
}

#[tokio::test]
async fn malformed_input_keeps_connection_open() {
    let (project, layer_id, addr, _shutdown) = start().await;
    let mut client = connect(addr).await;
    next_message(&mut client).await;

    client
        .send(Message::Text("{broken".to_string()))
        .await
        .unwrap();
    assert!(matches!(
        next_message(&mut client).await,
        ServerMessage::Error { .. }
    ));

    let reply = send(&mut client, json!({"type": "layer.teleport", "payload": {}})).await;
    assert!(matches!(reply, ServerMessage::Error { .. }));

    let reply = send(
        &mut client,
        json!({"type": "layer.delete", "payload": {"id": "missing"}}),
    )
    .await;
    assert!(matches!(reply, ServerMessage::Error { .. }));
    assert!(project.read().await.layer(&layer_id).is_some());

    // Still usable afterwards
    let reply = send(
        &mut client,
        json!({"type": "global.update", "payload": {"intensity": 0.25}}),
    )
    .await;
    assert!(matches!(reply, ServerMessage::Ack(_)));
    assert_eq!(project.read().await.global().intensity, 0.25);
}

#[tokio::test]
async fn serves_many_clients() {
    let (project, _, addr, _shutdown) = start().await;
    let mut first = connect(addr).await;
    let mut second = connect(addr).await;
    next_message(&mut first).await;
    next_message(&mut second).await;

    let geometry_id = project.read().await.geometries()[0].id.clone();
    for client in [&mut first, &mut second] {
        let reply = send(
            client,
            json!({"type": "layer.create", "payload": {"type": "color", "geometryId": geometry_id}}),
        )
        .await;
        let ServerMessage::Ack(ack) = reply else {
            panic!("expected ack");
        };
        assert!(ack.id.is_some());
    }
    assert_eq!(project.read().await.layers().len(), 3);
}

#[tokio::test]
async fn shutdown_closes_open_connections() {
    let (_project, _, addr, shutdown) = start().await;
    let mut client = connect(addr).await;
    next_message(&mut client).await;

    shutdown.send(true).unwrap();
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
