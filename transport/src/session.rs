use crate::chunk::{InboundChunk, Reassembler};
use crate::command_handler::CommandHandler;
use crate::reliable_sender::ReliableSender;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const WELCOME: &[u8] = b"Welcome to the UDP shell server!\r\n$ ";
const GOODBYE: &[u8] = b"Goodbye!\r\n";

/// The dispatcher's per-session record. The dispatcher task owns all handles exclusively;
///  removing one drops the channel senders, which lets the session's worker run to
///  completion on its own.
pub(crate) struct SessionHandle {
    pub peer_addr: SocketAddr,
    pub last_activity: Instant,
    pub inbound_tx: mpsc::Sender<InboundChunk>,
    pub ack_tx: mpsc::Sender<u64>,
}

impl SessionHandle {
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Sent from a session worker back to the dispatcher when the session ends on an
///  application-level `exit` (or when the worker winds down after eviction).
pub(crate) enum SessionEvent {
    Closed { session_id: String },
}

/// One independently running task per active session: consumes the session's inbound chunk
///  queue, re-assembles payloads, and produces replies through the session's reliable
///  sender.
pub(crate) struct SessionWorker {
    pub session_id: String,
    pub peer_addr: SocketAddr,
    pub handler: Arc<dyn CommandHandler>,
    pub sender: ReliableSender,
    pub inbound_rx: mpsc::Receiver<InboundChunk>,
    pub events_tx: mpsc::Sender<SessionEvent>,
}

impl SessionWorker {
    pub fn spawn(self) {
        tokio::spawn(async move {
            self.run().await;
        });
    }

    async fn run(mut self) {
        info!("session {} from {:?}: worker started", self.session_id, self.peer_addr);

        if let Err(e) = self.sender.send_payload(&self.session_id, WELCOME).await {
            warn!("session {}: failed to deliver welcome message: {}", self.session_id, e);
        }

        let mut reassembler = Reassembler::default();
        while let Some(chunk) = self.inbound_rx.recv().await {
            let Some(payload) = reassembler.push(&chunk.data, chunk.last) else {
                continue;
            };

            let command = String::from_utf8_lossy(&payload);
            let command = command.trim();

            if command.eq_ignore_ascii_case("exit") {
                info!("session {}: peer requested exit", self.session_id);
                if let Err(e) = self.sender.send_payload(&self.session_id, GOODBYE).await {
                    debug!("session {}: failed to deliver goodbye: {}", self.session_id, e);
                }
                break;
            }

            let response = self.handler.on_command(&self.session_id, command).await;
            if let Err(e) = self.sender.send_payload(&self.session_id, &response).await {
                // a terminal send failure is reported per payload; it does not tear the
                //  session down
                warn!("session {}: failed to deliver response: {}", self.session_id, e);
            }
        }

        let _ = self.events_tx
            .send(SessionEvent::Closed { session_id: self.session_id.clone() })
            .await;
        debug!("session {}: worker terminated", self.session_id);
    }
}
