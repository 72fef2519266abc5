//! The application layer on top of the reliable UDP transport: a toy interactive shell that
//!  echoes each command back with a prompt instead of executing it.

use async_trait::async_trait;
use tracing::info;
use transport::command_handler::CommandHandler;

/// Pretends to run each command, replying with an `Executing:` line and a fresh prompt.
pub struct EchoShellHandler;

#[async_trait]
impl CommandHandler for EchoShellHandler {
    async fn on_command(&self, session_id: &str, command: &str) -> Vec<u8> {
        info!("session {}: command {:?}", session_id, command);
        format!("Executing: {command}\r\n$ ").into_bytes()
    }
}
