use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

/// The consumer of re-assembled command payloads, one invocation per completed payload. The
///  returned bytes are chunked and sent back to the peer through the session's reliable
///  sender. The `exit` sentinel is handled by the transport before this trait is consulted.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn on_command(&self, session_id: &str, command: &str) -> Vec<u8>;
}
