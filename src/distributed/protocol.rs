//! Wire protocol
//!
//! This module defines the messages exchanged between the launcher, agents
//! and running workloads. Messages are serialized with MessagePack
//! (rmp-serde) for compact binary framing with full serde feature support.
//!
//! # Protocol Version
//!
//! Current version: 1
//!
//! # Message Flow
//!
//! ```text
//! Launcher (coordinator)          Agent                    Workload
//!     |                             |                          |
//!     |------ RUN_TEST ------------>|                          |
//!     |<----- DISPATCH_ACCEPTED ----|                          |
//!     |                             |------ spawn ------------>|
//!     |                                                        |
//!     |<---------------------- INIT_BARRIER -------------------|
//!     |----------------------- ACK --------------------------->|
//!     |<---------------------- ENTER_BARRIER ------------------|
//!     |         (parked until the cohort is complete)          |
//!     |----------------------- BARRIER_REPLY ----------------->|
//!     |                             |                          |
//!     |<----- NOTIFY_RESULT --------|   (after workload exit)  |
//!     |------ ACK ----------------->|                          |
//! ```
//!
//! # Message Framing
//!
//! Each message is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: message length][N bytes: MessagePack-serialized message]
//! ```

use crate::rendezvous::BarrierOutcome;
use crate::stats::TestResult;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
///
/// Launcher, agents and workload clients must agree on it.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame accepted from the wire
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Reference to a group's callback surface, handed to every dispatched test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackHandle {
    /// `host:port` of the group's callback server
    pub address: String,
    /// Group the surface belongs to; requests for other groups are refused
    pub group: String,
}

/// Protocol message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Run a test (Launcher → Agent)
    RunTest(RunTestMessage),

    /// The agent took the test and will report later (Agent → Launcher)
    DispatchAccepted(DispatchAcceptedMessage),

    /// The agent refused the test (Agent → Launcher)
    DispatchRejected(DispatchRejectedMessage),

    /// Final result of a test (Agent/Workload → Coordinator)
    NotifyResult(NotifyResultMessage),

    /// Declare participation in a barrier (Workload → Coordinator)
    InitBarrier(InitBarrierMessage),

    /// Enter a barrier and wait for the cohort (Workload → Coordinator)
    EnterBarrier(EnterBarrierMessage),

    /// Why an EnterBarrier call returned (Coordinator → Workload)
    BarrierReply(BarrierReplyMessage),

    /// Request handled (Coordinator → caller)
    Ack,

    /// Request refused (either direction)
    Error(ErrorMessage),
}

/// Run test message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTestMessage {
    /// Protocol version (must match)
    pub protocol_version: u32,

    /// Test name, unique within its group
    pub test_name: String,

    /// Workload executable on the agent host
    pub assembly: String,

    /// Entry point inside the workload
    pub test_to_run: String,

    /// Ordered `key=value` parameters
    pub params: Vec<String>,

    /// Barrier to pass before the test body (empty = none)
    pub start_barrier: String,

    /// Barrier to pass after the test body (empty = none)
    pub end_barrier: String,

    /// Where results and barrier calls go
    pub callback: CallbackHandle,
}

/// Dispatch accepted message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchAcceptedMessage {
    /// Agent identifier (hostname)
    pub agent_id: String,

    pub test_name: String,
}

/// Dispatch rejected message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRejectedMessage {
    /// Agent identifier (hostname)
    pub agent_id: String,

    pub test_name: String,

    /// Why the agent refused
    pub reason: String,
}

/// Notify result message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyResultMessage {
    pub protocol_version: u32,
    pub group: String,
    pub test_name: String,
    pub result: TestResult,
}

/// Init barrier message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitBarrierMessage {
    pub protocol_version: u32,
    pub group: String,
    pub test_name: String,
    pub barrier: String,

    /// Participant count; `None` sizes the barrier for the whole group
    pub required: Option<usize>,
}

/// Enter barrier message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnterBarrierMessage {
    pub protocol_version: u32,
    pub group: String,
    pub barrier: String,
}

/// Barrier reply message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrierReplyMessage {
    pub barrier: String,
    pub outcome: BarrierOutcome,
}

/// Error message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error description
    pub error: String,
}

impl Message {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Message::RunTest(_) => "RUN_TEST",
            Message::DispatchAccepted(_) => "DISPATCH_ACCEPTED",
            Message::DispatchRejected(_) => "DISPATCH_REJECTED",
            Message::NotifyResult(_) => "NOTIFY_RESULT",
            Message::InitBarrier(_) => "INIT_BARRIER",
            Message::EnterBarrier(_) => "ENTER_BARRIER",
            Message::BarrierReply(_) => "BARRIER_REPLY",
            Message::Ack => "ACK",
            Message::Error(_) => "ERROR",
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Message::Error(ErrorMessage { error: error.into() })
    }
}

/// Serialize a message to bytes
///
/// Prepends a 4-byte length field for framing.
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>> {
    let msg_bytes = rmp_serde::to_vec(msg)
        .context("Failed to serialize message")?;

    if msg_bytes.len() > MAX_FRAME_BYTES {
        anyhow::bail!("Message too large: {} bytes (max {})", msg_bytes.len(), MAX_FRAME_BYTES);
    }

    let msg_len = msg_bytes.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg_bytes.len());
    framed.extend_from_slice(&msg_len.to_le_bytes());
    framed.extend_from_slice(&msg_bytes);

    Ok(framed)
}

/// Read a complete message from a stream
pub async fn read_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Message> {
    match try_read_message(stream).await? {
        Some(msg) => Ok(msg),
        None => anyhow::bail!("Connection closed before a message arrived"),
    }
}

/// Read a message, or `None` if the peer closed the connection between messages
pub async fn try_read_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Option<Message>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("Failed to read message length"),
    }

    let msg_len = u32::from_le_bytes(len_buf) as usize;
    if msg_len > MAX_FRAME_BYTES {
        anyhow::bail!("Message too large: {} bytes (max {})", msg_len, MAX_FRAME_BYTES);
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream.read_exact(&mut msg_buf).await
        .context("Failed to read message body")?;

    let msg = rmp_serde::from_slice(&msg_buf)
        .context("Failed to deserialize message")?;

    Ok(Some(msg))
}

/// Write a message to a stream and flush it
pub async fn write_message<W: AsyncWrite + Unpin>(stream: &mut W, msg: &Message) -> Result<()> {
    let framed = serialize_message(msg)?;

    stream.write_all(&framed).await
        .context("Failed to write message")?;

    stream.flush().await
        .context("Failed to flush stream")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode(mut bytes: &[u8]) -> Message {
        let msg = read_message(&mut bytes).await.unwrap();
        assert!(bytes.is_empty());
        msg
    }

    fn handle() -> CallbackHandle {
        CallbackHandle {
            address: "10.0.0.5:40123".to_string(),
            group: "G1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_serialize_deserialize_run_test() {
        let msg = Message::RunTest(RunTestMessage {
            protocol_version: PROTOCOL_VERSION,
            test_name: "server".to_string(),
            assembly: "/opt/tests/repl".to_string(),
            test_to_run: "Repl.Server".to_string(),
            params: vec!["OS=linux".to_string()],
            start_barrier: "ready".to_string(),
            end_barrier: String::new(),
            callback: handle(),
        });

        let bytes = serialize_message(&msg).unwrap();

        match decode(&bytes).await {
            Message::RunTest(run) => {
                assert_eq!(run.protocol_version, PROTOCOL_VERSION);
                assert_eq!(run.test_name, "server");
                assert_eq!(run.params, vec!["OS=linux"]);
                assert_eq!(run.start_barrier, "ready");
                assert_eq!(run.callback, handle());
            }
            other => panic!("Wrong message type: {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_serialize_deserialize_notify_result() {
        let result = TestResult::failure("client", "timeout", "at client.rs:42", 3.25);
        let msg = Message::NotifyResult(NotifyResultMessage {
            protocol_version: PROTOCOL_VERSION,
            group: "G1".to_string(),
            test_name: "client".to_string(),
            result: result.clone(),
        });

        let bytes = serialize_message(&msg).unwrap();

        match decode(&bytes).await {
            Message::NotifyResult(notify) => {
                assert_eq!(notify.test_name, "client");
                assert_eq!(notify.result, result);
            }
            other => panic!("Wrong message type: {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_barrier_reply_keeps_outcome() {
        let msg = Message::BarrierReply(BarrierReplyMessage {
            barrier: "ready".to_string(),
            outcome: BarrierOutcome::Abandoned,
        });

        let bytes = serialize_message(&msg).unwrap();
        match decode(&bytes).await {
            Message::BarrierReply(reply) => assert_eq!(reply.outcome, BarrierOutcome::Abandoned),
            other => panic!("Wrong message type: {}", other.kind()),
        }
    }

    #[test]
    fn test_message_framing() {
        let bytes = serialize_message(&Message::Ack).unwrap();

        assert!(bytes.len() >= 4);
        let msg_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), 4 + msg_len);
    }

    #[tokio::test]
    async fn test_incomplete_buffer() {
        let bytes = serialize_message(&Message::error("nope")).unwrap();

        let mut short_len = &bytes[..2];
        assert!(read_message(&mut short_len).await.is_err());

        let mut short_body = &bytes[..bytes.len() - 1];
        assert!(read_message(&mut short_body).await.is_err());
    }

    #[tokio::test]
    async fn test_stream_read_write() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_message(&mut a, &Message::Ack).await.unwrap();
        write_message(&mut a, &Message::error("bad group")).await.unwrap();
        drop(a);

        assert!(matches!(read_message(&mut b).await.unwrap(), Message::Ack));
        match read_message(&mut b).await.unwrap() {
            Message::Error(err) => assert_eq!(err.error, "bad group"),
            other => panic!("Wrong message type: {}", other.kind()),
        }
        assert!(try_read_message(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_oversized_frame() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = (MAX_FRAME_BYTES as u32 + 1).to_le_bytes();
        a.write_all(&len).await.unwrap();

        assert!(try_read_message(&mut b).await.is_err());
    }
}
