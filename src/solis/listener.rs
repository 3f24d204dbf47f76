use crate::prelude::*;
use crate::solis::packet::{self, AckHeader};

use bytes::BytesMut;
use net2::TcpStreamExt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    Connected(SocketAddr),
    Disconnect(SocketAddr),
    Snapshot(Snapshot),
    Shutdown,
}
pub type Sender = broadcast::Sender<ChannelData>;
pub type Receiver = broadcast::Receiver<ChannelData>;

#[derive(Default)]
pub struct PacketStats {
    pub connections_accepted: u64,
    pub connections_closed: u64,
    pub frames_received: u64,
    pub frames_decoded: u64,
    pub decode_failures: u64,
    pub snapshots_published: u64,
    pub publish_failures: u64,
    pub acks_sent: u64,
}

impl PacketStats {
    pub fn print_summary(&self) {
        info!("Listener Statistics:");
        info!("  Connections accepted: {}", self.connections_accepted);
        info!("  Connections closed: {}", self.connections_closed);
        info!("  Frames received: {}", self.frames_received);
        info!("  Frames decoded: {}", self.frames_decoded);
        info!("  Decode failures: {}", self.decode_failures);
        info!("  Snapshots published: {}", self.snapshots_published);
        info!("  Publish failures: {}", self.publish_failures);
        info!("  Acknowledgements sent: {}", self.acks_sent);
    }
}

/// Accepts data-logger connections and runs one Session per connection.
#[derive(Clone)]
pub struct Listener {
    config: ConfigWrapper,
    channels: Channels,
    pub stats: Arc<Mutex<PacketStats>>,
}

impl Listener {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self {
            config,
            channels,
            stats: Arc::new(Mutex::new(PacketStats::default())),
        }
    }

    /// Bind and accept until shutdown. A bind failure is fatal to startup and
    /// surfaces to the caller; everything after that is contained per session.
    pub async fn start(&self) -> Result<()> {
        let listener_config = self.config.listener();
        let port = listener_config.port();

        if !listener_config.enabled() {
            info!("Listener disabled in config, not binding port {}", port);
            return Ok(());
        }

        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| ListenerError::Bind { port, source })?;

        info!("Listening for data-logger connections on port {}", port);

        let mut shutdown_rx = self.channels.to_listener.subscribe();

        loop {
            tokio::select! {
                msg = shutdown_rx.recv() => {
                    match msg {
                        Ok(ChannelData::Shutdown) => {
                            info!("Listener received shutdown signal");
                            break;
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if let Ok(mut stats) = self.stats.lock() {
                                stats.connections_accepted += 1;
                            }

                            let session = Session::new(
                                peer,
                                listener_config.clone(),
                                self.channels.clone(),
                                self.stats.clone(),
                            );
                            tokio::spawn(async move {
                                if let Err(e) = session.run(stream).await {
                                    warn!("session {}: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    }
                }
            }
        }

        // The socket is released when the listener drops here. Open sessions
        // drain naturally on peer disconnect; they are not cancelled.
        info!("Listener exiting, port {} released", port);
        Ok(())
    }

    /// Stop accepting new connections. Safe to call when never started or
    /// already stopped; the signal just goes nowhere.
    pub fn stop(&self) {
        let _ = self.channels.to_listener.send(ChannelData::Shutdown);
    }
}

/// One accepted connection: read chunks, decode, publish.
///
/// Sessions are independent; a malformed frame or transport error here never
/// reaches the listener or a sibling session. A session runs until its peer
/// disconnects; stopping the listener only stops the accept loop, it does
/// not cancel sessions already open.
pub struct Session {
    peer: SocketAddr,
    config: config::Listener,
    channels: Channels,
    stats: Arc<Mutex<PacketStats>>,
}

impl Session {
    pub fn new(
        peer: SocketAddr,
        config: config::Listener,
        channels: Channels,
        stats: Arc<Mutex<PacketStats>>,
    ) -> Self {
        Self {
            peer,
            config,
            channels,
            stats,
        }
    }

    pub async fn run(self, stream: TcpStream) -> Result<()> {
        let std_stream = stream.into_std()?;
        if let Err(e) = std_stream.set_keepalive(Some(Duration::from_secs(
            self.config.tcp_keepalive_secs(),
        ))) {
            warn!("Failed to set TCP keepalive: {}", e);
        }

        let stream = TcpStream::from_std(std_stream)?;
        if self.config.use_tcp_nodelay() {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY: {}", e);
            }
        }

        info!("TCP connection from {}", self.peer);
        let _ = self
            .channels
            .from_listener
            .send(ChannelData::Connected(self.peer));

        let (mut reader, mut writer) = stream.into_split();
        let mut buf = BytesMut::with_capacity(4096);

        loop {
            let len = match reader.read_buf(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    warn!("session {}: read error: {}", self.peer, e);
                    break;
                }
            };

            if len == 0 {
                debug!("TCP connection closed by {}", self.peer);
                break;
            }

            // One read is one logical frame in this deployment: the
            // data-logger pushes a single small frame per report interval,
            // and anything that arrives split or coalesced fails the
            // decoder's length gate rather than decoding wrong. No
            // cross-read reassembly.
            let frame = buf.split();

            if let Some(reply) = self.handle_frame(&frame) {
                if let Err(e) = writer.write_all(&reply).await {
                    warn!("session {}: failed to send acknowledgement: {}", self.peer, e);
                    break;
                }
                if let Ok(mut stats) = self.stats.lock() {
                    stats.acks_sent += 1;
                }
            }
        }

        let _ = self
            .channels
            .from_listener
            .send(ChannelData::Disconnect(self.peer));
        if let Ok(mut stats) = self.stats.lock() {
            stats.connections_closed += 1;
        }

        info!("session {}: exiting", self.peer);
        Ok(())
    }

    /// Decode one frame and publish the snapshot on success. Decode failures
    /// drop the frame and keep the session alive; the return value is the
    /// acknowledgement to write back, when one is configured.
    pub fn handle_frame(&self, frame: &[u8]) -> Option<Vec<u8>> {
        debug!(
            "session {}: received TCP text: {}",
            self.peer,
            packet::hex_projection(frame)
        );
        if let Ok(mut stats) = self.stats.lock() {
            stats.frames_received += 1;
        }

        match packet::decode_frame(frame) {
            Ok(snapshot) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.frames_decoded += 1;
                }

                // Broadcast send never blocks; the store applies the replace.
                match self
                    .channels
                    .from_listener
                    .send(ChannelData::Snapshot(snapshot))
                {
                    Ok(_) => {
                        if let Ok(mut stats) = self.stats.lock() {
                            stats.snapshots_published += 1;
                        }
                    }
                    Err(e) => {
                        // Snapshot for this frame is lost; the session goes on.
                        error!("session {}: failed to publish snapshot: {}", self.peer, e);
                        if let Ok(mut stats) = self.stats.lock() {
                            stats.publish_failures += 1;
                        }
                    }
                }

                None
            }
            Err(e) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.decode_failures += 1;
                }

                match &e {
                    DecodeError::UnrecognizedFrameSize(_) => {
                        debug!("session {}: {}", self.peer, e);
                    }
                    // More detail: either a malformed frame or an outdated
                    // field table for this firmware.
                    DecodeError::FieldExtraction { .. } => {
                        warn!("session {}: {}", self.peer, e);
                    }
                }

                if self.config.reply_to_unknown_frames() {
                    Some(packet::build_acknowledgement(AckHeader::default(), frame))
                } else {
                    None
                }
            }
        }
    }
}
