use crate::chunk;
use crate::config::RudpConfig;
use crate::packet::Packet;
use crate::send_pipeline::SendPipeline;
use anyhow::bail;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Drives one logical payload's transmission with stop-and-wait discipline: each chunk is
///  sent, then the sender blocks on the ack channel until the matching sequence number
///  arrives or the per-attempt timeout expires, re-transmitting the identical chunk on
///  timeout. After `max_retries` transmissions without a matching ack the whole payload send
///  is aborted - there is no partial-success signal.
///
/// The dispatcher owning the socket's read side feeds acks into the channel; this is the
///  only blocking point visible to callers, and it is bounded.
pub struct ReliableSender {
    config: Arc<RudpConfig>,
    pipeline: Arc<SendPipeline>,
    peer_addr: SocketAddr,
    inner: Mutex<SenderInner>,
}

struct SenderInner {
    next_seq: u64,
    ack_rx: mpsc::Receiver<u64>,
}

impl ReliableSender {
    pub fn new(
        config: Arc<RudpConfig>,
        pipeline: Arc<SendPipeline>,
        peer_addr: SocketAddr,
        ack_rx: mpsc::Receiver<u64>,
    ) -> ReliableSender {
        ReliableSender {
            config,
            pipeline,
            peer_addr,
            inner: Mutex::new(SenderInner {
                next_seq: 0,
                ack_rx,
            }),
        }
    }

    /// Send one payload reliably. Chunks are sent strictly sequentially - the next chunk
    ///  goes out only after the current one is acked - so send order is delivery order.
    pub async fn send_payload(&self, session_id: &str, payload: &[u8]) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;

        trace!("sending payload of {} bytes to {:?}", payload.len(), self.peer_addr);

        for chunk in chunk::split(payload, self.config.max_payload_size()) {
            let seq = inner.next_seq;
            inner.next_seq += 1;

            let encoded = Packet::data(seq, session_id, chunk.data, chunk.last)
                .encode(&self.config)?;
            self.send_chunk(&mut inner, seq, &encoded).await?;
        }
        Ok(())
    }

    async fn send_chunk(&self, inner: &mut SenderInner, seq: u64, encoded: &[u8]) -> anyhow::Result<()> {
        for attempt in 1..=self.config.max_retries {
            self.pipeline.send_packet(self.peer_addr, encoded).await;

            match timeout(self.config.ack_timeout, inner.ack_rx.recv()).await {
                Ok(Some(acked)) if acked == seq => {
                    trace!("chunk {} acknowledged", seq);
                    return Ok(());
                }
                Ok(Some(acked)) => {
                    // a stale ack consumes this attempt, same as a timeout
                    debug!("received ack {} while waiting for {} - retrying", acked, seq);
                }
                Ok(None) => bail!("ack channel closed while sending chunk {} to {:?}", seq, self.peer_addr),
                Err(_) => {
                    warn!("timeout waiting for ack {} from {:?} (attempt {}/{})", seq, self.peer_addr, attempt, self.config.max_retries);
                }
            }
        }
        bail!("giving up on chunk {} to {:?} after {} attempts", seq, self.peer_addr, self.config.max_retries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;
    use crate::send_pipeline::MockSendSocket;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::runtime::Builder;

    fn test_config() -> Arc<RudpConfig> {
        // header region 200 bytes + 10 payload bytes per packet keeps multi-chunk tests small
        Arc::new(RudpConfig {
            packet_size: 210,
            ..RudpConfig::default()
        })
    }

    /// mock socket that records decoded outgoing packets and acks them from the `ack_for`
    ///  transmission (1-based) onward
    fn acking_socket(
        config: Arc<RudpConfig>,
        ack_tx: mpsc::Sender<u64>,
        ack_from_transmission: u32,
        sent: Arc<StdMutex<Vec<Packet>>>,
    ) -> MockSendSocket {
        let mut socket = MockSendSocket::new();
        let transmissions = AtomicU32::new(0);
        socket.expect_do_send_packet()
            .returning(move |_to, buf| {
                let packet = Packet::decode(buf, &config).unwrap();
                let n = transmissions.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= ack_from_transmission {
                    ack_tx.try_send(packet.seq).unwrap();
                }
                sent.lock().unwrap().push(packet);
            });
        socket
    }

    #[test]
    fn test_single_chunk_acked_on_first_attempt() {
        let config = test_config();
        let (ack_tx, ack_rx) = mpsc::channel(16);
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let socket = acking_socket(config.clone(), ack_tx, 1, sent.clone());

        let sender = ReliableSender::new(config, Arc::new(SendPipeline::new(Arc::new(socket))), SocketAddr::from(([127, 0, 0, 1], 9)), ack_rx);

        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async move {
            sender.send_payload("sess", b"hello").await.unwrap();
        });

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].seq, 0);
        assert_eq!(sent[0].packet_type, PacketType::Last);
        assert_eq!(sent[0].payload, b"hello");
        assert_eq!(sent[0].session_id, "sess");
    }

    #[test]
    fn test_multi_chunk_payload_is_sequential_with_last_marker() {
        let config = test_config();
        let (ack_tx, ack_rx) = mpsc::channel(16);
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let socket = acking_socket(config.clone(), ack_tx, 1, sent.clone());

        let sender = ReliableSender::new(config, Arc::new(SendPipeline::new(Arc::new(socket))), SocketAddr::from(([127, 0, 0, 1], 9)), ack_rx);

        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async move {
            // 25 bytes with 10-byte chunks: DATA, DATA, LAST
            sender.send_payload("sess", &[7u8; 25]).await.unwrap();
            // a second payload continues the per-session sequence
            sender.send_payload("sess", b"x").await.unwrap();
        });

        let sent = sent.lock().unwrap();
        let seqs: Vec<u64> = sent.iter().map(|p| p.seq).collect();
        let types: Vec<PacketType> = sent.iter().map(|p| p.packet_type).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert_eq!(types, vec![PacketType::Data, PacketType::Data, PacketType::Last, PacketType::Last]);
    }

    #[test]
    fn test_lost_first_transmission_is_retried() {
        let config = test_config();
        let (ack_tx, ack_rx) = mpsc::channel(16);
        let sent = Arc::new(StdMutex::new(Vec::new()));
        // first transmission gets no ack, the retransmission does
        let socket = acking_socket(config.clone(), ack_tx, 2, sent.clone());

        let sender = ReliableSender::new(config, Arc::new(SendPipeline::new(Arc::new(socket))), SocketAddr::from(([127, 0, 0, 1], 9)), ack_rx);

        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async move {
            sender.send_payload("sess", b"hello").await.unwrap();
        });

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1], "retransmission must be the identical chunk");
    }

    #[test]
    fn test_retry_exhaustion_fails_the_payload() {
        let config = test_config();
        let (_ack_tx, ack_rx) = mpsc::channel::<u64>(16);
        let transmissions = Arc::new(AtomicU32::new(0));

        let mut socket = MockSendSocket::new();
        let counted = transmissions.clone();
        socket.expect_do_send_packet()
            .returning(move |_, _| {
                counted.fetch_add(1, Ordering::SeqCst);
            });

        let sender = ReliableSender::new(config.clone(), Arc::new(SendPipeline::new(Arc::new(socket))), SocketAddr::from(([127, 0, 0, 1], 9)), ack_rx);

        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async move {
            assert!(sender.send_payload("sess", b"hello").await.is_err());
        });

        assert_eq!(transmissions.load(Ordering::SeqCst), config.max_retries);
    }

    #[test]
    fn test_stale_ack_consumes_an_attempt() {
        let config = test_config();
        let (ack_tx, ack_rx) = mpsc::channel(16);
        // a stale ack from an earlier exchange is already queued
        ack_tx.try_send(99).unwrap();

        let sent = Arc::new(StdMutex::new(Vec::new()));
        let socket = acking_socket(config.clone(), ack_tx, 2, sent.clone());

        let sender = ReliableSender::new(config, Arc::new(SendPipeline::new(Arc::new(socket))), SocketAddr::from(([127, 0, 0, 1], 9)), ack_rx);

        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async move {
            sender.send_payload("sess", b"hello").await.unwrap();
        });

        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_closed_ack_channel_fails_fast() {
        let config = test_config();
        let (ack_tx, ack_rx) = mpsc::channel::<u64>(16);
        drop(ack_tx);

        let mut socket = MockSendSocket::new();
        socket.expect_do_send_packet().times(1).return_const(());

        let sender = ReliableSender::new(config, Arc::new(SendPipeline::new(Arc::new(socket))), SocketAddr::from(([127, 0, 0, 1], 9)), ack_rx);

        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async move {
            assert!(sender.send_payload("sess", b"hello").await.is_err());
        });
    }
}
