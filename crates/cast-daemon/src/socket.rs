use crate::core::{CommandOutcome, DaemonEvent};
use cast_daemon::{BroadcastMessage, CastController};
use cast_proto::protocol::{payload_len, Broadcast, Command, Message, MAX_FRAME_LEN, PROTOCOL_VERSION};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{error, info, warn};

pub fn start_server(
    bind_address: String,
    port: u16,
    controller: Arc<CastController>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);
        serve(listener, controller, event_tx, broadcast_tx).await;
    })
}

/// Accept clients on an already bound listener until the task is dropped.
pub async fn serve(
    listener: TcpListener,
    controller: Arc<CastController>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) {
    let mut client_id = 0usize;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                info!("Client {} connected from {}", id, peer);

                let controller = controller.clone();
                let evt_tx = event_tx.clone();
                let bcast_rx = broadcast_tx.subscribe();

                tokio::spawn(async move {
                    handle_client(stream, controller, id, evt_tx, bcast_rx).await;
                    info!("Client {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    controller: Arc<CastController>,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Hello carries the full state so a fresh client can draw immediately
    if let Ok(encoded) = encode_hello(&controller).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        while let Some(len) = payload_len(&read_buf) {
                            // Never buffer towards a frame that could not be accepted
                            if len > MAX_FRAME_LEN {
                                warn!("Client {} announced a {} byte frame, closing", client_id, len);
                                let message = format!("frame of {} bytes exceeds the {} byte limit", len, MAX_FRAME_LEN);
                                let _ = send_frame(&mut write_half, Broadcast::Error { message }).await;
                                return;
                            }
                            // Partial frame: wait for more bytes
                            if read_buf.len() < 4 + len {
                                break;
                            }
                            match Message::decode(&read_buf) {
                                Ok((Message::Command(cmd), consumed)) => {
                                    read_buf.drain(..consumed);
                                    info!("Client {} sent command: {:?}", client_id, cmd);

                                    let Some(outcome) = dispatch(&event_tx, cmd).await else {
                                        warn!("DaemonEvent channel closed");
                                        return;
                                    };
                                    let (error, volume) = match outcome {
                                        Ok(volume) => (None, volume),
                                        Err(message) => (Some(message), None),
                                    };
                                    if send_frame(&mut write_half, Broadcast::Reply { error, volume }).await.is_err() {
                                        return;
                                    }
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(e) => {
                                    warn!("Client {} sent an undecodable frame: {}", client_id, e);
                                    read_buf.drain(..4 + len);
                                    let message = format!("bad frame: {}", e);
                                    let _ = send_frame(&mut write_half, Broadcast::Error { message }).await;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let encoded = match msg {
                    Ok(BroadcastMessage::StateUpdated) => encode_state(&controller).await,
                    Ok(BroadcastMessage::Presence(text)) => {
                        Message::Broadcast(Broadcast::Presence { text }).encode()
                    }
                    Ok(BroadcastMessage::Volume(value)) => {
                        Message::Broadcast(Broadcast::Volume { value }).encode()
                    }
                    Ok(BroadcastMessage::Log(message)) => {
                        Message::Broadcast(Broadcast::Log { message }).encode()
                    }
                    Ok(BroadcastMessage::Error(message)) => {
                        Message::Broadcast(Broadcast::Error { message }).encode()
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        encode_state(&controller).await
                    }
                    Err(_) => break,
                };
                if let Ok(encoded) = encoded {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Hand a command to the core and wait for its outcome.  `None` when the
/// core is gone.
async fn dispatch(event_tx: &mpsc::Sender<DaemonEvent>, cmd: Command) -> Option<CommandOutcome> {
    let (reply_tx, reply_rx) = oneshot::channel();
    event_tx
        .send(DaemonEvent::ClientCommand {
            cmd,
            reply: Some(reply_tx),
        })
        .await
        .ok()?;
    reply_rx.await.ok()
}

async fn send_frame(write_half: &mut OwnedWriteHalf, broadcast: Broadcast) -> anyhow::Result<()> {
    let encoded = Message::Broadcast(broadcast).encode()?;
    write_half.write_all(&encoded).await?;
    Ok(())
}

async fn encode_hello(controller: &CastController) -> anyhow::Result<Vec<u8>> {
    let state = controller.cast_state().await;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        state,
    })
    .encode()
}

async fn encode_state(controller: &CastController) -> anyhow::Result<Vec<u8>> {
    let state = controller.cast_state().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}
