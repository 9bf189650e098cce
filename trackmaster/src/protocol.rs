//! Wire messages and newline-delimited JSON framing.
//!
//! Every message is one JSON document on a single line.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use trackreduce::{
    ActivityStats, AggregateStatistics, Chunk, PartialResult, RouteId, Segment, UserStatistics,
};

use crate::error::{MasterError, Result};

/// Client -> coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    SubmitTrack { file_name: String, contents: String },
}

/// Coordinator -> client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Track parsed and queued for dispatch
    Accepted { file_name: String, route_id: RouteId },
    /// Track could not be turned into a route; nothing was queued
    Rejected { file_name: String, reason: String },
    RouteStats(ActivityStats),
    UserStats(UserStatistics),
    AllUsers(AggregateStatistics),
    /// Route was dispatched but will never be reduced
    RouteFailed { route_id: RouteId, reason: String },
}

/// Coordinator -> worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Sent once after connect, before any chunk
    Configure { segments: Vec<Segment>, tolerance_m: f64 },
    Process(Chunk),
}

/// Worker -> coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerResponse {
    Partial(PartialResult),
}

/// Reads one message per line from a byte stream.
pub struct MessageReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            lines: BufReader::new(inner).lines(),
        }
    }

    /// Next message, or `None` once the peer closed the stream.
    pub async fn next<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&line)
                .map(Some)
                .map_err(|e| MasterError::Protocol(format!("undecodable message: {}", e)));
        }
    }
}

/// Write one message followed by a newline and flush.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackreduce::ClientId;

    #[tokio::test]
    async fn test_messages_cross_a_stream() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, mut server_write) = tokio::io::split(server);
        let mut reader = MessageReader::new(client);

        let sent = vec![
            ClientMessage::Accepted {
                file_name: "a.json".to_string(),
                route_id: RouteId(4),
            },
            ClientMessage::RouteFailed {
                route_id: RouteId(4),
                reason: "worker lost".to_string(),
            },
        ];
        for message in &sent {
            write_message(&mut server_write, message).await.unwrap();
        }
        drop(server_write);
        drop(server_read);

        let mut received = Vec::new();
        while let Some(message) = reader.next::<ClientMessage>().await.unwrap() {
            received.push(message);
        }
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_garbage_is_a_protocol_error() {
        let (client, mut server) = tokio::io::duplex(256);
        server.write_all(b"not json\n").await.unwrap();
        let mut reader = MessageReader::new(client);
        let err = reader.next::<WorkerResponse>().await.unwrap_err();
        assert!(matches!(err, MasterError::Protocol(_)));
    }

    #[test]
    fn test_chunk_request_is_tagged() {
        let request = WorkerRequest::Process(trackreduce::Chunk {
            route_id: RouteId(1),
            client_id: ClientId(2),
            index: 0,
            waypoints: vec![],
        });
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.starts_with(r#"{"type":"process""#));
    }
}
