//! A session-oriented, reliable delivery protocol built directly on UDP, used as the transport
//!  of an interactive command-session service. UDP may lose, duplicate or reorder datagrams;
//!  this layer reconstructs ordered, complete, integrity-checked payloads on top of it while
//!  serving many concurrent client sessions through a single listening socket.
//!
//! ## Design goals
//!
//! * One UDP socket per endpoint. The accepting side multiplexes all sessions over its single
//!    listening socket; sessions are identified by an opaque id carried in every packet.
//! * The abstraction is sending / receiving *payloads* (defined-length chunks of application
//!   data as opposed to a byte stream). Big payloads are chunked below the IP fragmentation
//!   threshold and re-assembled on the receiving side.
//! * Stop-and-wait discipline: a sender keeps at most one chunk in flight, re-transmitting it
//!   on an ack timeout and giving up after a bounded number of attempts. This caps throughput
//!   at one round trip per chunk but makes send order equal delivery order.
//! * Every transport wait is bounded: a failed payload send surfaces as an error result instead
//!   of hanging, and a single malformed packet never terminates a receive loop.
//! * Sessions are created on the first `CONNECT` from a peer and are torn down either by an
//!   application-level `exit` command or by a periodic sweep removing idle sessions.
//!
//! Explicitly *not* goals: encryption or authenticated key exchange (the checksum detects
//!  accidental corruption only), congestion control or adaptive windowing, and protocol
//!  version negotiation.
//!
//! ## Wire format
//!
//! Every packet is a single UDP datagram of at most 1400 bytes:
//!
//! ```ascii
//! 0:   header - a JSON record, UTF-8, right-padded with ASCII spaces to exactly 200 bytes:
//!        {"seq": <u64>, "checksum": "<32 hex chars>", "type": "<kind>", "length": <usize>,
//!         "session": "<session id, may be empty>"}
//! 200: payload - at most 1200 bytes; the `length` header field gives its exact size
//! ```
//!
//! Packet kinds:
//!
//! * `CONNECT` - session setup request. Sent with seq 0 and an empty session id on first
//!    contact; the accepting side generates the id.
//! * `CONNECT_ACK` - setup reply carrying the session id as its payload. Idempotent: a
//!    repeated `CONNECT` for a known session gets the same reply again, which is required for
//!    the peer's retry loop to converge.
//! * `DATA` / `LAST` - one chunk of an application payload; `LAST` marks the final chunk.
//!    These are the only kinds whose checksum is verified (lowercase hex MD5 of the payload).
//! * `ACK` - acknowledges a received `DATA`/`LAST` chunk by echoing its sequence number. Acks
//!    are sent for every validated receipt, including re-transmitted duplicates, so a peer
//!    that missed an earlier ack still gets one.
//!
//! Sequence numbers are assigned by the sender and are strictly increasing per sender-session
//!  pair; the receiver never invents one.
//!
//! ## Error handling
//!
//! Malformed headers, truncated datagrams, checksum mismatches and unknown session references
//!  are logged and dropped without a reply - the sender's timeout / retry path recovers from
//!  the silence. Only an exhausted retry budget is surfaced to the caller, and it fails the
//!  whole payload send (no partial-success signal); the session itself stays alive.
//!
//! ## Known simplification
//!
//! Re-assembly appends chunks in arrival order without de-duplication or a reordering window.
//!  Stop-and-wait keeps one chunk in flight per sender, so arrival order equals send order
//!  under normal operation - but a re-transmission racing a network-delayed original can make
//!  the consumer observe duplicated bytes. This mirrors the baseline protocol; a stricter
//!  variant would track a per-session highest-delivered-sequence watermark.

pub mod chunk;
pub mod client_endpoint;
pub mod command_handler;
pub mod config;
pub mod packet;
pub mod reliable_sender;
pub mod send_pipeline;
pub mod server_endpoint;
mod session;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor(unsafe)]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
