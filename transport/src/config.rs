use anyhow::bail;
use std::time::Duration;

/// Tuning knobs shared by both endpoint roles. The defaults reproduce the baseline protocol
///  parameters; tests shrink the timeouts.
pub struct RudpConfig {
    /// Total capacity of one packet, i.e. the size of the UDP datagram. Chosen below the
    ///  common 1500-byte Ethernet MTU so packets are never IP-fragmented.
    pub packet_size: usize,

    /// The fixed-size region at the start of every packet holding the JSON header, padded
    ///  with spaces. The payload capacity per packet is `packet_size - header_size`.
    pub header_size: usize,

    /// How long one transmission of a chunk waits for its matching ack before it is
    ///  re-transmitted.
    pub ack_timeout: Duration,

    /// Maximum number of transmissions per chunk (including the first). Once exhausted, the
    ///  whole payload send fails.
    pub max_retries: u32,

    /// Sessions with no valid inbound packet for longer than this are removed by the sweep.
    pub idle_timeout: Duration,

    /// How often the accepting side's dispatcher scans for idle sessions.
    pub sweep_interval: Duration,

    /// How long the initiating side waits for the first chunk of a response payload.
    pub response_timeout: Duration,

    /// How long the initiating side waits for each further chunk of a response payload once
    ///  the first one has arrived.
    pub response_idle_timeout: Duration,

    /// Capacity of the per-session inbound chunk queue (and of the ack hand-off channel).
    ///  The dispatcher drops chunks instead of blocking when a session's queue is full, so
    ///  one slow session cannot stall the others.
    pub inbound_queue_depth: usize,
}

impl Default for RudpConfig {
    fn default() -> RudpConfig {
        RudpConfig {
            packet_size: 1400,
            header_size: 200,
            ack_timeout: Duration::from_secs(1),
            max_retries: 5,
            idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(1),
            response_timeout: Duration::from_secs(2),
            response_idle_timeout: Duration::from_secs(1),
            inbound_queue_depth: 64,
        }
    }
}

impl RudpConfig {
    /// The biggest payload that fits into a single packet.
    pub fn max_payload_size(&self) -> usize {
        self.packet_size - self.header_size
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        // the JSON header with a 32-char session id and a 32-char checksum needs ~130 bytes
        if self.header_size < 150 {
            bail!("header region of {} bytes is too small for the packet header", self.header_size);
        }
        if self.packet_size <= self.header_size {
            bail!("packet size {} leaves no room for payload after the {} byte header", self.packet_size, self.header_size);
        }
        if self.max_retries == 0 {
            bail!("at least one transmission attempt per chunk is required");
        }
        if self.inbound_queue_depth == 0 {
            bail!("inbound queue depth must be positive");
        }
        Ok(())
    }
}
