//! TCP relay in front of the rumqttd listener.
//!
//! rumqttd reports neither who published a message nor when a client goes
//! away. Every client socket is therefore accepted here and piped to the
//! broker's loopback listener. Packets sent by the client are framed on the
//! way through: the CONNECT login names the session, each PUBLISH is reported
//! under that name, and the socket closing ends the session.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use rumqttc::mqttbytes::{self, v4::Packet};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use crate::broker::Shared;

/// Largest packet relayed, matching the broker's own limit.
pub(crate) const MAX_PACKET_SIZE: usize = 1024 * 1024;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept clients on `listener` forever, one relay task each.
pub(crate) async fn serve(listener: TcpListener, upstream: SocketAddr, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((client, peer)) => {
                tokio::spawn(relay(client, peer, upstream, Arc::clone(&shared)));
            }
            Err(err) => {
                tracing::warn!(error = %err, "local broker accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn relay(client: TcpStream, peer: SocketAddr, upstream: SocketAddr, shared: Arc<Shared>) {
    let broker = match TcpStream::connect(upstream).await {
        Ok(broker) => broker,
        Err(err) => {
            tracing::warn!(%peer, error = %err, "local broker unreachable");
            return;
        }
    };
    let mut closing = shared.closing();
    let (client_rx, mut client_tx) = client.into_split();
    let (mut broker_rx, broker_tx) = broker.into_split();
    let mut session = Session::default();

    let result = tokio::select! {
        result = session.pipe(client_rx, broker_tx, &shared) => result,
        result = tokio::io::copy(&mut broker_rx, &mut client_tx) => result.map(|_| ()),
        _ = closing.changed() => Ok(()),
    };
    if let Err(err) = result {
        tracing::debug!(%peer, error = %err, "local client relay failed");
    }
    if let Some(username) = session.username.take() {
        shared.session_closed(&username);
    }
}

/// What the relay learned about one client connection.
#[derive(Debug, Default)]
struct Session {
    /// Set once the CONNECT login matched a stored credential.
    username: Option<String>,
}

impl Session {
    async fn pipe(
        &mut self,
        mut client: OwnedReadHalf,
        mut broker: OwnedWriteHalf,
        shared: &Shared,
    ) -> io::Result<()> {
        let mut buffer = BytesMut::with_capacity(4096);
        loop {
            while let Some(frame) = next_frame(&mut buffer)? {
                self.observe(&frame, shared);
                broker.write_all(&frame).await?;
            }
            if client.read_buf(&mut buffer).await? == 0 {
                return Ok(());
            }
        }
    }

    fn observe(&mut self, frame: &BytesMut, shared: &Shared) {
        match Packet::read(&mut frame.clone(), MAX_PACKET_SIZE) {
            Ok(Packet::Connect(connect)) => {
                let Some(login) = connect.login else {
                    return;
                };
                if self.username.is_none()
                    && shared.session_opened(&login.username, login.password.as_bytes())
                {
                    self.username = Some(login.username);
                }
            }
            Ok(Packet::Publish(publish)) => {
                if let Some(username) = &self.username {
                    shared.published(username, publish.topic, publish.payload.to_vec());
                }
            }
            Ok(_) => {}
            // the broker answers malformed packets itself
            Err(err) => tracing::trace!(error = %err, "packet relayed undecoded"),
        }
    }
}

/// Split one complete MQTT frame off the front of `buffer`.
fn next_frame(buffer: &mut BytesMut) -> io::Result<Option<BytesMut>> {
    match mqttbytes::check(buffer.iter(), MAX_PACKET_SIZE) {
        Ok(header) => Ok(Some(buffer.split_to(header.frame_length()))),
        Err(mqttbytes::Error::InsufficientBytes(_)) => Ok(None),
        Err(err) => Err(io::Error::new(io::ErrorKind::InvalidData, err)),
    }
}
