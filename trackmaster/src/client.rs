//! Submitting client.
//!
//! Each submission uses its own connection and waits for the three
//! deliveries of its route. Submitting a whole directory runs the
//! submissions concurrently.

use std::path::{Path, PathBuf};

use futures::future::join_all;
use tokio::net::TcpStream;
use trackreduce::{ActivityStats, AggregateStatistics, RouteId, UserStatistics};

use crate::config::ClientConfig;
use crate::error::{MasterError, Result};
use crate::protocol::{write_message, ClientMessage, ClientRequest, MessageReader};

/// Everything the coordinator reports for one submitted track.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteReport {
    pub file_name: String,
    pub route_id: RouteId,
    pub route: ActivityStats,
    /// The submitting user's totals including this route
    pub user: UserStatistics,
    pub all_users: AggregateStatistics,
}

/// Regular files in `dir`, sorted by path.
pub fn list_tracks(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

pub struct TrackClient {
    config: ClientConfig,
}

impl TrackClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Read and submit one track file.
    pub async fn submit(&self, path: &Path) -> Result<RouteReport> {
        let contents = tokio::fs::read_to_string(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.submit_contents(file_name, contents).await
    }

    /// Submit track contents and wait for the route's results.
    pub async fn submit_contents(&self, file_name: String, contents: String) -> Result<RouteReport> {
        let addr = self.config.master_addr;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| MasterError::Connection {
                peer: addr.to_string(),
                message: e.to_string(),
            })?;
        let (read, mut write) = stream.into_split();
        let mut reader = MessageReader::new(read);

        write_message(
            &mut write,
            &ClientRequest::SubmitTrack {
                file_name: file_name.clone(),
                contents,
            },
        )
        .await?;

        let route_id = match next_message(&mut reader).await? {
            ClientMessage::Accepted { route_id, .. } => route_id,
            ClientMessage::Rejected { reason, .. } => return Err(MasterError::Rejected(reason)),
            other => return Err(unexpected(&other)),
        };
        log::info!("[Client] {} accepted as route {}", file_name, route_id);

        let route = match next_message(&mut reader).await? {
            ClientMessage::RouteStats(stats) => stats,
            ClientMessage::RouteFailed { route_id, reason } => {
                return Err(MasterError::RouteAbandoned { route_id, reason })
            }
            other => return Err(unexpected(&other)),
        };
        let user = match next_message(&mut reader).await? {
            ClientMessage::UserStats(user) => user,
            other => return Err(unexpected(&other)),
        };
        let all_users = match next_message(&mut reader).await? {
            ClientMessage::AllUsers(all) => all,
            other => return Err(unexpected(&other)),
        };

        Ok(RouteReport {
            file_name,
            route_id,
            route,
            user,
            all_users,
        })
    }

    /// Submit every track in the configured directory concurrently.
    pub async fn submit_all(&self) -> Result<Vec<(PathBuf, Result<RouteReport>)>> {
        let files = list_tracks(&self.config.track_dir)?;
        log::info!(
            "[Client] Submitting {} tracks from {}",
            files.len(),
            self.config.track_dir.display()
        );
        let reports = join_all(files.iter().map(|path| self.submit(path))).await;
        Ok(files.into_iter().zip(reports).collect())
    }
}

async fn next_message(reader: &mut MessageReader<tokio::net::tcp::OwnedReadHalf>) -> Result<ClientMessage> {
    reader.next().await?.ok_or_else(|| {
        MasterError::Protocol("coordinator closed the connection early".to_string())
    })
}

fn unexpected(message: &ClientMessage) -> MasterError {
    MasterError::Protocol(format!("unexpected message: {:?}", message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_tracks_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let names: Vec<String> = list_tracks(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[test]
    fn test_list_tracks_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            list_tracks(&dir.path().join("absent")),
            Err(MasterError::Io(_))
        ));
    }
}
