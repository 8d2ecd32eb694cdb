//! CLI-side IPC client for communicating with the daemon

use tokio::io::{ReadHalf, WriteHalf};

use crate::common::{Error, Result};
use crate::engine::Notification;

use super::protocol::{Command, Push, Request, Response};
use super::transport::{self, Stream};

/// Client for communicating with the test daemon
pub struct DaemonClient {
    reader: ReadHalf<Stream>,
    writer: WriteHalf<Stream>,
    next_id: u64,
}

impl DaemonClient {
    /// Connect to the running daemon
    pub async fn connect() -> Result<Self> {
        let stream = transport::connect().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound
                || e.kind() == std::io::ErrorKind::ConnectionRefused
            {
                Error::DaemonNotRunning
            } else {
                Error::DaemonConnectionFailed(e)
            }
        })?;

        let (reader, writer) = tokio::io::split(stream);

        Ok(Self {
            reader,
            writer,
            next_id: 1,
        })
    }

    /// Send a command and wait for the response
    pub async fn send_command(&mut self, command: Command) -> Result<serde_json::Value> {
        let id = self.next_id;
        self.next_id += 1;

        let request = Request { id, command };

        transport::send_json(&mut self.writer, &request)
            .await
            .map_err(|e| Error::DaemonCommunication(e.to_string()))?;

        let response: Response = transport::recv_json(&mut self.reader)
            .await
            .map_err(|e| Error::DaemonCommunication(e.to_string()))?;

        if response.id != id {
            return Err(Error::DaemonCommunication(format!(
                "Response ID mismatch: expected {}, got {}",
                id, response.id
            )));
        }

        if response.success {
            Ok(response.result.unwrap_or(serde_json::json!({})))
        } else {
            let error = response
                .error
                .unwrap_or_else(|| crate::common::error::IpcError {
                    code: "UNKNOWN".to_string(),
                    message: "Unknown error".to_string(),
                });
            Err(error.into())
        }
    }

    /// Switch this connection to a notification stream
    ///
    /// After the subscribe acknowledgement the daemon stops answering
    /// commands on this connection and pushes event frames instead. Use a
    /// second connection for further commands.
    pub async fn subscribe(mut self) -> Result<NotificationStream> {
        self.send_command(Command::Subscribe).await?;
        Ok(NotificationStream {
            reader: self.reader,
        })
    }

    /// Check if daemon is responding
    pub async fn ping(&mut self) -> Result<bool> {
        match self.send_command(Command::ListTestCases).await {
            Ok(_) => Ok(true),
            Err(Error::DaemonNotRunning) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Read side of a subscribed connection
pub struct NotificationStream {
    reader: ReadHalf<Stream>,
}

impl NotificationStream {
    /// Wait for the next pushed notification
    ///
    /// Returns `None` when the daemon closes the connection.
    pub async fn next(&mut self) -> Result<Option<Notification>> {
        match transport::recv_json::<_, Push>(&mut self.reader).await {
            Ok(push) => Ok(Some(push.notification)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(Error::DaemonCommunication(e.to_string())),
        }
    }
}
