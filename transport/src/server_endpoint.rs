use crate::chunk::InboundChunk;
use crate::command_handler::CommandHandler;
use crate::config::RudpConfig;
use crate::packet::{Packet, PacketType};
use crate::reliable_sender::ReliableSender;
use crate::send_pipeline::SendPipeline;
use crate::session::{SessionEvent, SessionHandle, SessionWorker};
use rustc_hash::FxHashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// The accepting side of the protocol: one long-lived task owns the listening socket's read
///  side, classifies incoming packets and routes them - acks to the owning session's send
///  wait point, data chunks to the session's inbound queue, connection requests to session
///  creation. The session registry is owned exclusively by this task; the idle sweep and
///  worker-exit handling are folded into the same `select!` loop, so registry mutations are
///  never concurrent.
pub struct ServerEndpoint {
    socket: Arc<UdpSocket>,
    pipeline: Arc<SendPipeline>,
    handler: Arc<dyn CommandHandler>,
    config: Arc<RudpConfig>,
}

impl ServerEndpoint {
    pub async fn bind(
        addr: SocketAddr,
        handler: Arc<dyn CommandHandler>,
        config: Arc<RudpConfig>,
    ) -> anyhow::Result<ServerEndpoint> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("bound receive socket to {:?}", socket.local_addr()?);

        let pipeline = Arc::new(SendPipeline::new(Arc::new(socket.clone())));
        Ok(ServerEndpoint {
            socket,
            pipeline,
            handler,
            config,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// The dispatcher loop. Runs until the shutdown signal flips; a single bad packet or
    ///  socket read error never terminates it.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("starting receive loop");

        let mut dispatcher = Dispatcher::new(self.pipeline.clone(), self.handler.clone(), self.config.clone());
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let mut sweep = interval(self.config.sweep_interval);

        let mut buf = vec![0u8; self.config.packet_size];
        loop {
            select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((num_read, from)) => dispatcher.on_datagram(&buf[..num_read], from, &events_tx).await,
                        Err(e) => error!("socket error: {}", e),
                    }
                }
                _ = sweep.tick() => dispatcher.sweep_idle_sessions(),
                Some(event) = events_rx.recv() => dispatcher.on_session_event(event),
                _ = shutdown.changed() => {
                    info!("shutdown signal received - stopping receive loop");
                    break;
                }
            }
        }
    }
}

/// Registry plus packet routing, separated from the socket loop so it can be driven
///  directly in tests.
struct Dispatcher {
    pipeline: Arc<SendPipeline>,
    handler: Arc<dyn CommandHandler>,
    config: Arc<RudpConfig>,
    sessions: FxHashMap<String, SessionHandle>,
}

impl Dispatcher {
    fn new(pipeline: Arc<SendPipeline>, handler: Arc<dyn CommandHandler>, config: Arc<RudpConfig>) -> Dispatcher {
        Dispatcher {
            pipeline,
            handler,
            config,
            sessions: FxHashMap::default(),
        }
    }

    async fn on_datagram(&mut self, datagram: &[u8], from: SocketAddr, events_tx: &mpsc::Sender<SessionEvent>) {
        let packet = match Packet::decode(datagram, &self.config) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("dropping invalid packet from {:?}: {}", from, e);
                return;
            }
        };
        trace!("received {:?} packet {} for session {:?} from {:?}", packet.packet_type, packet.seq, packet.session_id, from);

        match packet.packet_type {
            PacketType::Connect => self.on_connect(packet, from, events_tx).await,
            PacketType::Data | PacketType::Last => self.on_data(packet, from).await,
            PacketType::Ack => self.on_ack(packet),
            PacketType::ConnectAck => debug!("ignoring CONNECT_ACK on the accepting side"),
        }
    }

    /// Look up or create the session, then reply with CONNECT_ACK either way - resending it
    ///  for an already-known session keeps the peer's connect retry loop correct.
    async fn on_connect(&mut self, packet: Packet, from: SocketAddr, events_tx: &mpsc::Sender<SessionEvent>) {
        let session_id = if !packet.session_id.is_empty() && self.sessions.contains_key(&packet.session_id) {
            debug!("repeated CONNECT for session {} - resending CONNECT_ACK", packet.session_id);
            packet.session_id
        }
        else {
            let session_id = if packet.session_id.is_empty() {
                Uuid::new_v4().simple().to_string()
            }
            else {
                packet.session_id
            };
            info!("new session {} from {:?}", session_id, from);

            let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_queue_depth);
            let (ack_tx, ack_rx) = mpsc::channel(self.config.inbound_queue_depth);

            SessionWorker {
                session_id: session_id.clone(),
                peer_addr: from,
                handler: self.handler.clone(),
                sender: ReliableSender::new(self.config.clone(), self.pipeline.clone(), from, ack_rx),
                inbound_rx,
                events_tx: events_tx.clone(),
            }.spawn();

            self.sessions.insert(session_id.clone(), SessionHandle {
                peer_addr: from,
                last_activity: Instant::now(),
                inbound_tx,
                ack_tx,
            });
            session_id
        };

        self.send_control(Packet::connect_ack(&session_id), from).await;
    }

    async fn on_data(&mut self, packet: Packet, from: SocketAddr) {
        let inbound_tx = match self.sessions.get_mut(&packet.session_id) {
            Some(session) => {
                if session.peer_addr != from {
                    warn!("data for session {} from {:?} instead of {:?} - dropping", packet.session_id, from, session.peer_addr);
                    return;
                }
                session.touch();
                session.inbound_tx.clone()
            }
            None => {
                warn!("received data for unknown session {:?} from {:?} - dropping", packet.session_id, from);
                return;
            }
        };

        let last = packet.packet_type == PacketType::Last;
        if inbound_tx.try_send(InboundChunk { data: packet.payload, last }).is_err() {
            // withholding the ack makes the peer re-transmit the dropped chunk
            warn!("inbound queue of session {} is full or closed - dropping chunk {} unacknowledged", packet.session_id, packet.seq);
            return;
        }

        // ack every enqueued receipt, retransmitted duplicates included
        self.send_control(Packet::ack(packet.seq, &packet.session_id), from).await;
    }

    fn on_ack(&mut self, packet: Packet) {
        match self.sessions.get(&packet.session_id) {
            Some(session) => {
                if session.ack_tx.try_send(packet.seq).is_err() {
                    debug!("no pending send waiting for ack {} on session {}", packet.seq, packet.session_id);
                }
            }
            None => debug!("ack for unknown session {:?} - dropping", packet.session_id),
        }
    }

    fn sweep_idle_sessions(&mut self) {
        let idle_timeout = self.config.idle_timeout;
        self.sessions.retain(|session_id, session| {
            if session.last_activity.elapsed() > idle_timeout {
                info!("removing inactive session {}", session_id);
                false
            }
            else {
                true
            }
        });
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Closed { session_id } => {
                if self.sessions.remove(&session_id).is_some() {
                    info!("session {} closed", session_id);
                }
            }
        }
    }

    async fn send_control(&self, packet: Packet, to: SocketAddr) {
        match packet.encode(&self.config) {
            Ok(buf) => self.pipeline.send_packet(to, &buf).await,
            Err(e) => error!("failed to encode {:?} packet: {}", packet.packet_type, e),
        }
    }
}
