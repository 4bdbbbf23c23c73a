//! Control protocol: one JSON object per line over the daemon's Unix socket.
//!
//! ```text
//! → {"cmd":"poll","account":"acme"}
//! ← {"ok":true,"data":{...}}
//! ```

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

const STATUS_ATTEMPTS: u32 = 5;
const STATUS_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Commands the daemon accepts, tagged by `cmd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum DaemonRequest {
    Status,
    Stop,
    /// Run a cycle now; every account when `account` is absent.
    Poll {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account: Option<String>,
    },
}

impl DaemonRequest {
    pub fn poll(account: Option<String>) -> Self {
        Self::Poll { account }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// The payload of a successful response; a failed one becomes
    /// [`DaemonError::Protocol`].
    pub fn into_result(self) -> Result<Value, DaemonError> {
        match (self.ok, self.error) {
            (true, _) => Ok(self.data.unwrap_or(Value::Null)),
            (false, error) => Err(DaemonError::Protocol(
                error.unwrap_or_else(|| "unknown daemon error".to_string()),
            )),
        }
    }
}

/// Blocking client for the socket under one tagwatch home.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket: PathBuf,
}

impl DaemonClient {
    pub fn at(home: &Path) -> Self {
        Self {
            socket: socket_path(home),
        }
    }

    /// Send `request` and wait for the single response line.
    pub fn send(&self, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
        let mut stream = self.connect()?;
        let mut payload = serde_json::to_vec(request)?;
        payload.push(b'\n');
        stream
            .write_all(&payload)
            .and_then(|()| stream.flush())
            .map_err(|e| io_err(&self.socket, e))?;

        let mut line = String::new();
        let read = BufReader::new(stream)
            .read_line(&mut line)
            .map_err(|e| io_err(&self.socket, e))?;
        if read == 0 {
            return Err(DaemonError::Protocol(
                "daemon closed connection before responding".to_string(),
            ));
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }

    /// [`send`](Self::send), unwrapping the response payload.
    pub fn call(&self, request: &DaemonRequest) -> Result<Value, DaemonError> {
        self.send(request)?.into_result()
    }

    /// Runtime status; retried briefly so a daemon still binding its socket
    /// is not reported as stopped.
    pub fn status(&self) -> Result<Value, DaemonError> {
        let mut attempt = 1;
        loop {
            match self.call(&DaemonRequest::Status) {
                Err(DaemonError::DaemonNotRunning { .. }) if attempt < STATUS_ATTEMPTS => {
                    attempt += 1;
                    sleep(STATUS_RETRY_DELAY);
                }
                result => return result,
            }
        }
    }

    pub fn stop(&self) -> Result<(), DaemonError> {
        self.call(&DaemonRequest::Stop).map(|_| ())
    }

    /// Ask the daemon to poll now and wait for its cycle summary.
    pub fn poll(&self, account: Option<String>) -> Result<Value, DaemonError> {
        self.call(&DaemonRequest::poll(account))
    }

    fn connect(&self) -> Result<UnixStream, DaemonError> {
        let not_running = || DaemonError::DaemonNotRunning {
            socket: self.socket.clone(),
        };
        if !self.socket.exists() {
            return Err(not_running());
        }
        UnixStream::connect(&self.socket).map_err(|err| match err.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                not_running()
            }
            _ => io_err(&self.socket, err),
        })
    }
}
