//! The bootstrap protocol for one instance.

use std::sync::Arc;
use std::time::Duration;

use fleet_core::LaunchConfig;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{BootstrapError, BootstrapResult, TransportError};
use crate::transport::{Channel, RemoteTransport, Session};

/// Timing knobs for the bootstrap loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapSettings {
    /// Pause between connection/authentication attempts.
    pub retry_interval: Duration,
    /// Bound on a single connection attempt.
    pub connect_timeout: Duration,
    /// Pause between startup-script sentinel checks.
    pub startup_poll_interval: Duration,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            startup_poll_interval: Duration::from_secs(5),
        }
    }
}

/// The agent binary copied onto every worker.
#[derive(Debug, Clone)]
pub struct AgentPayload {
    pub file_name: String,
    pub bytes: Arc<[u8]>,
}

impl AgentPayload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }
}

/// A running agent and the session it was started in.
#[derive(Debug)]
pub struct AgentConnection {
    pub session: Session,
    /// The agent's stdin/stdout, used as the worker's control channel.
    pub channel: Channel,
    pub address: String,
    /// Connection attempts it took to get an authenticated session.
    pub attempts: u32,
}

/// Drives a [`RemoteTransport`] through the bootstrap protocol.
#[derive(Clone)]
pub struct BootstrapExecutor {
    transport: Arc<dyn RemoteTransport>,
    payload: AgentPayload,
    settings: BootstrapSettings,
}

impl BootstrapExecutor {
    /// Drive `transport` with `payload` as the agent.
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        payload: AgentPayload,
        settings: BootstrapSettings,
    ) -> Self {
        Self {
            transport,
            payload,
            settings,
        }
    }

    /// The transport sessions are opened through.
    pub fn transport(&self) -> &Arc<dyn RemoteTransport> {
        &self.transport
    }

    /// Bootstrap the agent on `address`. Connection and authentication are
    /// retried until `deadline`. Any session opened along the way is closed
    /// before an error is returned, including when the deadline passes.
    pub async fn bootstrap(
        &self,
        worker: &str,
        address: &str,
        launch: &LaunchConfig,
        wait_for_startup_script: bool,
        deadline: Instant,
    ) -> BootstrapResult<AgentConnection> {
        let (session, attempts) = self
            .connect_authenticated(worker, address, launch, deadline)
            .await?;

        let started = tokio::time::timeout_at(
            deadline,
            self.start_agent(worker, &session, launch, wait_for_startup_script),
        )
        .await
        .unwrap_or(Err(BootstrapError::DeadlineExceeded));

        match started {
            Ok(channel) => {
                info!(worker, address, attempts, "agent started");
                Ok(AgentConnection {
                    session,
                    channel,
                    address: address.to_string(),
                    attempts,
                })
            }
            Err(e) => {
                self.transport.close(&session).await;
                Err(e)
            }
        }
    }

    async fn connect_authenticated(
        &self,
        worker: &str,
        address: &str,
        launch: &LaunchConfig,
        deadline: Instant,
    ) -> BootstrapResult<(Session, u32)> {
        let mut attempts = 0u32;
        while Instant::now() < deadline {
            attempts += 1;
            match self.try_connect(address, launch.port, deadline).await {
                Ok(session) => {
                    let auth = tokio::time::timeout_at(
                        deadline,
                        self.transport
                            .authenticate(&session, &launch.user, &launch.credential),
                    )
                    .await;
                    match auth {
                        Ok(Ok(true)) => {
                            debug!(worker, address, attempts, "session authenticated");
                            return Ok((session, attempts));
                        }
                        Ok(Ok(false)) => {
                            debug!(worker, address, attempts, "authentication refused, retrying");
                        }
                        Ok(Err(e)) => {
                            warn!(worker, address, attempts, error = %e, "authentication error, retrying");
                        }
                        Err(_) => debug!(worker, address, attempts, "authentication cut off by deadline"),
                    }
                    self.transport.close(&session).await;
                }
                Err(e) => {
                    debug!(worker, address, attempts, error = %e, "connect failed, retrying");
                }
            }
            tokio::time::sleep_until((Instant::now() + self.settings.retry_interval).min(deadline))
                .await;
        }
        Err(BootstrapError::DeadlineExceeded)
    }

    async fn try_connect(
        &self,
        address: &str,
        port: u16,
        deadline: Instant,
    ) -> Result<Session, TransportError> {
        let timeout = self.settings.connect_timeout;
        let until = (Instant::now() + timeout).min(deadline);
        match tokio::time::timeout_at(until, self.transport.connect(address, port, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    async fn start_agent(
        &self,
        worker: &str,
        session: &Session,
        launch: &LaunchConfig,
        wait_for_startup_script: bool,
    ) -> BootstrapResult<Channel> {
        if wait_for_startup_script {
            let check = launch.startup_finished_command();
            while self.transport.exec(session, &check).await? != 0 {
                debug!(worker, "startup script still running");
                tokio::time::sleep(self.settings.startup_poll_interval).await;
            }
            debug!(worker, "startup script finished");
        }

        self.run(session, &launch.mkdir_command()).await?;

        let remote = launch.remote_path(&self.payload.file_name);
        self.transport
            .copy_file(session, &self.payload.bytes, &remote)
            .await?;
        debug!(worker, path = %remote, bytes = self.payload.bytes.len(), "agent copied");

        let command = launch.agent_command(&self.payload.file_name);
        Ok(self.transport.open_channel(session, &command).await?)
    }

    async fn run(&self, session: &Session, command: &str) -> BootstrapResult<()> {
        match self.transport.exec(session, command).await? {
            0 => Ok(()),
            code => Err(BootstrapError::CommandFailed {
                command: command.to_string(),
                code,
            }),
        }
    }
}
