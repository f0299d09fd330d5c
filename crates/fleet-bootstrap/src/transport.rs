//! The remote shell boundary.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{Credential, LaunchMethod};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransportResult;

/// An open remote shell session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: u64,
    pub host: String,
    pub port: u16,
}

/// Streams of a long-running remote command.
pub struct Channel {
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

/// Remote execution capability (SSH, WinRM, …).
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn connect(&self, host: &str, port: u16, timeout: Duration) -> TransportResult<Session>;

    /// `Ok(false)` means the credential was refused, which is expected
    /// while keys are still propagating to a new instance.
    async fn authenticate(
        &self,
        session: &Session,
        user: &str,
        credential: &Credential,
    ) -> TransportResult<bool>;

    async fn copy_file(
        &self,
        session: &Session,
        contents: &[u8],
        remote_path: &str,
    ) -> TransportResult<()>;

    /// Run a command to completion and return its exit code.
    async fn exec(&self, session: &Session, command: &str) -> TransportResult<i32>;

    /// Start a command and hand back its streams.
    async fn open_channel(&self, session: &Session, command: &str) -> TransportResult<Channel>;

    async fn close(&self, session: &Session);
}

const PREEMPTED_URL: &str = "http://metadata.google.internal/computeMetadata/v1/instance/preempted?wait_for_change=true";

/// Long-poll of the metadata server's preemption flag. Prints `TRUE` once
/// the provider announces preemption.
pub fn preemption_watch_command(method: LaunchMethod) -> String {
    match method {
        LaunchMethod::Unix => format!(
            "while true; do curl -sf -H 'Metadata-Flavor: Google' '{PREEMPTED_URL}'; echo; done"
        ),
        LaunchMethod::Windows => format!(
            "powershell -NoProfile -Command \"while ($true) {{ Invoke-RestMethod -Headers @{{'Metadata-Flavor'='Google'}} -Uri '{PREEMPTED_URL}' }}\""
        ),
    }
}
