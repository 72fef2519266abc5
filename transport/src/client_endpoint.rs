use crate::chunk::{InboundChunk, Reassembler};
use crate::config::RudpConfig;
use crate::packet::{Packet, PacketType};
use crate::reliable_sender::ReliableSender;
use crate::send_pipeline::SendPipeline;
use anyhow::bail;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace, warn};

/// The result of one command round trip.
#[derive(Debug)]
pub struct CommandOutput {
    pub output: Vec<u8>,
    pub elapsed: Duration,
}

/// Timing of one reliable bulk transfer.
#[derive(Debug)]
pub struct FileTransfer {
    pub file_size: usize,
    pub elapsed: Duration,
    pub bytes_per_second: f64,
}

/// Aggregate wire statistics for one connection's lifetime.
#[derive(Debug)]
pub struct TransferStats {
    pub connect_time: Duration,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// The initiating side of the protocol. One endpoint is one session: `connect` performs the
///  handshake and consumes the greeting, after which commands and bulk payloads go through
///  the same stop-and-wait machinery the accepting side uses.
///
/// A background task owns the socket's read side and routes acks, the session assignment
///  and response chunks into channels; the endpoint itself is driven by the caller and is
///  not `Sync` - one request/response exchange runs at a time.
pub struct ClientEndpoint {
    server_addr: SocketAddr,
    config: Arc<RudpConfig>,
    pipeline: Arc<SendPipeline>,
    sender: ReliableSender,
    session_id: String,
    connect_time: Duration,
    data_rx: mpsc::Receiver<InboundChunk>,
    bytes_received: Arc<AtomicU64>,
    shutdown_tx: watch::Sender<bool>,
}

impl ClientEndpoint {
    /// Bind an ephemeral local socket, perform the connect handshake with its retry loop,
    ///  and consume the greeting the peer sends on session creation.
    pub async fn connect(server_addr: SocketAddr, config: Arc<RudpConfig>) -> anyhow::Result<ClientEndpoint> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        debug!("bound local socket {:?} for server {:?}", socket.local_addr()?, server_addr);

        let pipeline = Arc::new(SendPipeline::new(Arc::new(socket.clone())));
        let (ack_tx, ack_rx) = mpsc::channel(config.inbound_queue_depth);
        let (data_tx, data_rx) = mpsc::channel(config.inbound_queue_depth);
        let (session_tx, mut session_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let bytes_received = Arc::new(AtomicU64::new(0));

        RecvLoop {
            socket,
            server_addr,
            config: config.clone(),
            pipeline: pipeline.clone(),
            ack_tx,
            data_tx,
            session_tx: Some(session_tx),
            bytes_received: bytes_received.clone(),
        }.spawn(shutdown_rx);

        let start = Instant::now();
        let session_id = Self::handshake(&config, &pipeline, server_addr, &mut session_rx).await?;
        let connect_time = start.elapsed();
        info!("connected to {:?} as session {} in {:?}", server_addr, session_id, connect_time);

        let sender = ReliableSender::new(config.clone(), pipeline.clone(), server_addr, ack_rx);

        let mut endpoint = ClientEndpoint {
            server_addr,
            config,
            pipeline,
            sender,
            session_id,
            connect_time,
            data_rx,
            bytes_received,
            shutdown_tx,
        };

        // the greeting is a courtesy; a connection with the session id assigned is usable
        //  even if the greeting payload never arrives
        match endpoint.receive_response().await {
            Ok(greeting) => trace!("greeting: {:?}", String::from_utf8_lossy(&greeting)),
            Err(e) => debug!("proceeding without a greeting from {:?}: {}", server_addr, e),
        }
        Ok(endpoint)
    }

    async fn handshake(
        config: &RudpConfig,
        pipeline: &SendPipeline,
        server_addr: SocketAddr,
        session_rx: &mut mpsc::Receiver<String>,
    ) -> anyhow::Result<String> {
        let connect_buf = Packet::connect("").encode(config)?;
        for attempt in 1..=config.max_retries {
            pipeline.send_packet(server_addr, &connect_buf).await;
            match timeout(config.ack_timeout, session_rx.recv()).await {
                Ok(Some(session_id)) => return Ok(session_id),
                Ok(None) => bail!("receive loop terminated during handshake"),
                Err(_) => warn!("no CONNECT_ACK from {:?} within {:?} (attempt {} of {})",
                    server_addr, config.ack_timeout, attempt, config.max_retries),
            }
        }
        bail!("giving up on connecting to {:?} after {} attempts", server_addr, config.max_retries);
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Send one command line and collect the peer's reply.
    pub async fn send_command(&mut self, command: &str) -> anyhow::Result<CommandOutput> {
        let start = Instant::now();

        let mut payload = command.as_bytes().to_vec();
        payload.push(b'\n');
        self.sender.send_payload(&self.session_id, &payload).await?;

        let output = self.receive_response().await?;
        Ok(CommandOutput {
            output,
            elapsed: start.elapsed(),
        })
    }

    /// Push a bulk payload through the reliable channel, timing the transfer. The peer
    ///  treats it like any other inbound payload and replies; the reply is consumed and
    ///  discarded so the stream stays framed.
    pub async fn send_file(&mut self, content: &[u8]) -> anyhow::Result<FileTransfer> {
        let start = Instant::now();
        self.sender.send_payload(&self.session_id, content).await?;
        let elapsed = start.elapsed();

        let _ = self.receive_response().await?;

        Ok(FileTransfer {
            file_size: content.len(),
            elapsed,
            bytes_per_second: content.len() as f64 / elapsed.as_secs_f64(),
        })
    }

    /// End the session: the peer replies with its farewell and forgets the session.
    pub async fn disconnect(mut self) -> anyhow::Result<()> {
        self.sender.send_payload(&self.session_id, b"exit\n").await?;
        let farewell = self.receive_response().await?;
        trace!("farewell: {:?}", String::from_utf8_lossy(&farewell));

        let _ = self.shutdown_tx.send(true);
        info!("disconnected session {}", self.session_id);
        Ok(())
    }

    pub fn stats(&self) -> TransferStats {
        TransferStats {
            connect_time: self.connect_time,
            bytes_sent: self.pipeline.bytes_sent(),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    /// Collect one complete response payload. The first chunk gets the (longer) response
    ///  timeout, continuation chunks the idle timeout.
    async fn receive_response(&mut self) -> anyhow::Result<Vec<u8>> {
        let mut reassembler = Reassembler::default();
        let mut chunk_timeout = self.config.response_timeout;
        loop {
            match timeout(chunk_timeout, self.data_rx.recv()).await {
                Ok(Some(chunk)) => {
                    if let Some(payload) = reassembler.push(&chunk.data, chunk.last) {
                        return Ok(payload);
                    }
                    chunk_timeout = self.config.response_idle_timeout;
                }
                Ok(None) => bail!("receive loop terminated while waiting for a response"),
                Err(_) => bail!("no response from {:?} within {:?}", self.server_addr, chunk_timeout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::send_pipeline::MockSendSocket;
    use std::sync::Mutex as StdMutex;

    async fn recv_loop(
        config: Arc<RudpConfig>,
        sent: Arc<StdMutex<Vec<Packet>>>,
        data_tx: mpsc::Sender<InboundChunk>,
    ) -> RecvLoop {
        let mut socket = MockSendSocket::new();
        let decode_config = config.clone();
        socket.expect_do_send_packet()
            .returning(move |_to, buf| {
                sent.lock().unwrap().push(Packet::decode(buf, &decode_config).unwrap());
            });

        let (ack_tx, _ack_rx) = mpsc::channel(16);

        RecvLoop {
            socket: Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap()),
            server_addr: SocketAddr::from(([127, 0, 0, 1], 9)),
            config,
            pipeline: Arc::new(SendPipeline::new(Arc::new(socket))),
            ack_tx,
            data_tx,
            session_tx: None,
            bytes_received: Arc::new(AtomicU64::new(0)),
        }
    }

    #[tokio::test]
    async fn test_response_chunk_is_enqueued_then_acked() {
        let config = Arc::new(RudpConfig::default());
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let (data_tx, mut data_rx) = mpsc::channel(16);
        let mut recv_loop = recv_loop(config.clone(), sent.clone(), data_tx).await;

        let datagram = Packet::data(5, "sess", b"hi", true).encode(&config).unwrap();
        recv_loop.on_datagram(&datagram, SocketAddr::from(([127, 0, 0, 1], 9))).await;

        assert_eq!(data_rx.try_recv().unwrap(), InboundChunk { data: b"hi".to_vec(), last: true });

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].packet_type, PacketType::Ack);
        assert_eq!(sent[0].seq, 5);
    }

    #[tokio::test]
    async fn test_full_response_queue_drops_chunk_without_ack() {
        let config = Arc::new(RudpConfig::default());
        let sent = Arc::new(StdMutex::new(Vec::new()));

        // a single-slot response queue that is already full
        let (data_tx, mut data_rx) = mpsc::channel(1);
        data_tx.try_send(InboundChunk { data: b"queued".to_vec(), last: false }).unwrap();
        let mut recv_loop = recv_loop(config.clone(), sent.clone(), data_tx).await;

        let datagram = Packet::data(5, "sess", b"hi", true).encode(&config).unwrap();
        recv_loop.on_datagram(&datagram, SocketAddr::from(([127, 0, 0, 1], 9))).await;

        // no ack went out, so the peer will re-transmit the dropped chunk
        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(data_rx.try_recv().unwrap().data, b"queued");
        assert!(data_rx.try_recv().is_err());
    }
}

/// Background task owning the read side of the initiating endpoint's socket.
struct RecvLoop {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    config: Arc<RudpConfig>,
    pipeline: Arc<SendPipeline>,
    ack_tx: mpsc::Sender<u64>,
    data_tx: mpsc::Sender<InboundChunk>,
    session_tx: Option<mpsc::Sender<String>>,
    bytes_received: Arc<AtomicU64>,
}

impl RecvLoop {
    fn spawn(self, shutdown: watch::Receiver<bool>) {
        tokio::spawn(async move {
            self.run(shutdown).await;
        });
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; self.config.packet_size];
        loop {
            select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((num_read, from)) => self.on_datagram(&buf[..num_read], from).await,
                        Err(e) => warn!("socket error: {}", e),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("receive loop terminated");
    }

    async fn on_datagram(&mut self, datagram: &[u8], from: SocketAddr) {
        let packet = match Packet::decode(datagram, &self.config) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("dropping invalid packet from {:?}: {}", from, e);
                return;
            }
        };
        self.bytes_received.fetch_add(datagram.len() as u64, Ordering::Relaxed);
        trace!("received {:?} packet {} from {:?}", packet.packet_type, packet.seq, from);

        match packet.packet_type {
            PacketType::Ack => {
                if self.ack_tx.try_send(packet.seq).is_err() {
                    debug!("no pending send waiting for ack {}", packet.seq);
                }
            }
            PacketType::ConnectAck => {
                // only the first assignment counts; re-sent CONNECT_ACKs are dropped here
                if let Some(session_tx) = self.session_tx.take() {
                    let _ = session_tx.try_send(String::from_utf8_lossy(&packet.payload).into_owned());
                }
            }
            PacketType::Data | PacketType::Last => {
                let last = packet.packet_type == PacketType::Last;
                if self.data_tx.try_send(InboundChunk { data: packet.payload, last }).is_err() {
                    // withholding the ack makes the peer re-transmit the dropped chunk
                    warn!("response queue is full or closed - dropping chunk {} unacknowledged", packet.seq);
                    return;
                }

                match Packet::ack(packet.seq, &packet.session_id).encode(&self.config) {
                    Ok(ack_buf) => self.pipeline.send_packet(self.server_addr, &ack_buf).await,
                    Err(e) => warn!("failed to encode ack: {}", e),
                }
            }
            PacketType::Connect => debug!("ignoring CONNECT on the initiating side"),
        }
    }
}
