//! The hub over TCP.

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::codec::FrameCodec;
use crate::error::BusResult;
use crate::hub::{BusPort, BusReceiver, BusSender, Hub};

/// Accept connections until shutdown, attaching each to the hub.
pub async fn serve(listener: TcpListener, hub: Hub, mut shutdown: watch::Receiver<bool>) -> BusResult<()> {
    info!(addr = ?listener.local_addr().ok(), "bus hub listening");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                debug!(%peer, "bus client connected");
                let port = hub.attach();
                tokio::spawn(async move {
                    relay(stream, port).await;
                    debug!(%peer, "bus client disconnected");
                });
            }
            _ = shutdown.changed() => {
                info!("bus hub shutting down");
                return Ok(());
            }
        }
    }
}

/// Pump frames between a socket and a hub port until either side closes.
async fn relay(stream: TcpStream, port: BusPort) {
    let (mut sink, mut source) = Framed::new(stream, FrameCodec::new()).split();
    let (sender, mut receiver) = port.split();
    loop {
        tokio::select! {
            from_socket = source.next() => match from_socket {
                Some(Ok(frame)) => {
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "bus connection failed");
                    break;
                }
                None => break,
            },
            to_socket = receiver.recv() => match to_socket {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        warn!(error = %e, "bus write failed");
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

/// Connect to a remote hub; the returned port behaves like a local one.
pub async fn connect(addr: impl ToSocketAddrs) -> BusResult<BusPort> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (out_tx, mut out_rx) = mpsc::channel(256);
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (mut sink, mut source) = Framed::new(stream, FrameCodec::new()).split();

    tokio::spawn(async move {
        let mut inbound_open = true;
        loop {
            tokio::select! {
                outgoing = out_rx.recv() => match outgoing {
                    Some(frame) => {
                        if let Err(e) = sink.send(frame).await {
                            warn!(error = %e, "bus write failed");
                            break;
                        }
                    }
                    None => break,
                },
                incoming = source.next(), if inbound_open => match incoming {
                    Some(Ok(frame)) => {
                        if in_tx.send(frame).is_err() {
                            inbound_open = false;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "bus connection failed");
                        break;
                    }
                    None => break,
                },
            }
        }
        debug!("bus connection closed");
    });

    Ok(BusPort {
        sender: BusSender::new(out_tx),
        receiver: BusReceiver::new(in_rx),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Envelope, Frame, Method};
    use bytes::Bytes;

    #[tokio::test]
    async fn remote_ports_exchange_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = Hub::new();
        let (stop_tx, stop_rx) = watch::channel(false);
        let server = tokio::spawn(serve(listener, hub.clone(), stop_rx));

        let mut local = hub.attach();
        let remote = connect(addr).await.unwrap();

        remote
            .send(Frame::binary_reply("j9", "w0", Bytes::from_static(b"image bytes")))
            .await
            .unwrap();
        let frame = local.recv().await.unwrap();
        assert_eq!(frame.envelope.id, "j9");
        assert_eq!(frame.payload.unwrap(), Bytes::from_static(b"image bytes"));

        let mut remote = remote;
        local
            .send(Envelope::reply("j9", "hub", Method::Ack))
            .await
            .unwrap();
        assert_eq!(remote.recv().await.unwrap().envelope.method, Method::Ack);

        stop_tx.send(true).unwrap();
        server.await.unwrap().unwrap();
    }
}
