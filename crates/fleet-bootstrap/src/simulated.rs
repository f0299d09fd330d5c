//! In-memory remote shell.
//!
//! Each host follows a [`HostBehavior`]: how many connects it refuses, how
//! many authentications it rejects, how long its startup script runs.
//! Channels are backed by in-memory duplex pipes whose far ends the test
//! (or the simulated daemon) can take to play the agent.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::Credential;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tracing::debug;

use crate::error::{TransportError, TransportResult};
use crate::transport::{Channel, RemoteTransport, Session};

const CHANNEL_BUFFER: usize = 64 * 1024;

/// How a simulated host responds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostBehavior {
    /// Refuse this many connection attempts before accepting.
    pub refuse_connects: u32,
    /// Never accept a connection.
    pub unreachable: bool,
    /// Connection attempts never complete.
    pub hang_connects: bool,
    /// Reject this many authentications before accepting.
    pub reject_auths: u32,
    /// Report the startup script as running for this many checks.
    pub startup_polls: u32,
    /// Every exec exits with status 1.
    pub fail_commands: bool,
}

impl HostBehavior {
    /// A host that refuses every connection.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }
}

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect { host: String },
    Authenticate { host: String, user: String },
    Exec { host: String, command: String },
    CopyFile { host: String, path: String, len: usize },
    OpenChannel { host: String, command: String },
    Close { host: String },
}

impl TransportCall {
    fn host(&self) -> &str {
        match self {
            Self::Connect { host }
            | Self::Authenticate { host, .. }
            | Self::Exec { host, .. }
            | Self::CopyFile { host, .. }
            | Self::OpenChannel { host, .. }
            | Self::Close { host } => host,
        }
    }
}

#[derive(Default)]
struct HostCounters {
    connects: u32,
    auths: u32,
    startup_checks: u32,
}

#[derive(Default)]
struct TransportState {
    behaviors: HashMap<String, HostBehavior>,
    default_behavior: HostBehavior,
    counters: HashMap<String, HostCounters>,
    journal: Vec<TransportCall>,
    next_session: u64,
    agent_ends: HashMap<String, DuplexStream>,
    watch_ends: HashMap<String, DuplexStream>,
}

impl TransportState {
    fn behavior(&self, host: &str) -> HostBehavior {
        self.behaviors
            .get(host)
            .cloned()
            .unwrap_or_else(|| self.default_behavior.clone())
    }
}

/// In-memory [`RemoteTransport`].
#[derive(Default)]
pub struct SimulatedTransport {
    state: Mutex<TransportState>,
}

impl SimulatedTransport {
    /// Every host reachable and well-behaved.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Script how `host` behaves.
    pub fn set_host(&self, host: &str, behavior: HostBehavior) {
        self.state().behaviors.insert(host.to_string(), behavior);
    }

    /// Behaviour for hosts without an explicit entry.
    pub fn set_default(&self, behavior: HostBehavior) {
        self.state().default_behavior = behavior;
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.state().journal.clone()
    }

    /// Calls made against `host`.
    pub fn calls_for(&self, host: &str) -> Vec<TransportCall> {
        self.state()
            .journal
            .iter()
            .filter(|c| c.host() == host)
            .cloned()
            .collect()
    }

    /// Connection attempts made against `host`.
    pub fn connect_attempts(&self, host: &str) -> u32 {
        self.state().counters.get(host).map_or(0, |c| c.connects)
    }

    /// Take the remote end of the agent channel opened on `host`.
    pub fn take_channel_end(&self, host: &str) -> Option<DuplexStream> {
        self.state().agent_ends.remove(host)
    }

    /// Drop the agent's end so the worker sees its control channel close.
    pub fn drop_agent(&self, host: &str) -> bool {
        self.state().agent_ends.remove(host).is_some()
    }

    /// Announce preemption to the watcher running on `host`. Returns false
    /// when no watcher is attached.
    pub async fn preempt(&self, host: &str) -> bool {
        let end = self.state().watch_ends.remove(host);
        let Some(mut end) = end else {
            return false;
        };
        let delivered = end.write_all(b"TRUE\n").await.is_ok();
        self.state().watch_ends.insert(host.to_string(), end);
        debug!(host, delivered, "[SIM] preemption announced");
        delivered
    }

    fn record(&self, call: TransportCall) {
        self.state().journal.push(call);
    }
}

#[async_trait]
impl RemoteTransport for SimulatedTransport {
    async fn connect(&self, host: &str, port: u16, _timeout: Duration) -> TransportResult<Session> {
        let (behavior, attempt, id) = {
            let mut state = self.state();
            state.journal.push(TransportCall::Connect {
                host: host.to_string(),
            });
            let behavior = state.behavior(host);
            let counters = state.counters.entry(host.to_string()).or_default();
            counters.connects += 1;
            let attempt = counters.connects;
            state.next_session += 1;
            (behavior, attempt, state.next_session)
        };

        if behavior.hang_connects {
            std::future::pending::<()>().await;
        }
        if behavior.unreachable || attempt <= behavior.refuse_connects {
            return Err(TransportError::Connect {
                host: host.to_string(),
                port,
                reason: "connection refused".to_string(),
            });
        }
        Ok(Session {
            id,
            host: host.to_string(),
            port,
        })
    }

    async fn authenticate(
        &self,
        session: &Session,
        user: &str,
        _credential: &Credential,
    ) -> TransportResult<bool> {
        let mut state = self.state();
        state.journal.push(TransportCall::Authenticate {
            host: session.host.clone(),
            user: user.to_string(),
        });
        let behavior = state.behavior(&session.host);
        let counters = state.counters.entry(session.host.clone()).or_default();
        counters.auths += 1;
        Ok(counters.auths > behavior.reject_auths)
    }

    async fn copy_file(
        &self,
        session: &Session,
        contents: &[u8],
        remote_path: &str,
    ) -> TransportResult<()> {
        self.record(TransportCall::CopyFile {
            host: session.host.clone(),
            path: remote_path.to_string(),
            len: contents.len(),
        });
        Ok(())
    }

    async fn exec(&self, session: &Session, command: &str) -> TransportResult<i32> {
        let mut state = self.state();
        state.journal.push(TransportCall::Exec {
            host: session.host.clone(),
            command: command.to_string(),
        });
        let behavior = state.behavior(&session.host);
        if behavior.fail_commands {
            return Ok(1);
        }
        if command.contains(".startup-script-finished") {
            let counters = state.counters.entry(session.host.clone()).or_default();
            counters.startup_checks += 1;
            return Ok(if counters.startup_checks > behavior.startup_polls {
                0
            } else {
                1
            });
        }
        Ok(0)
    }

    async fn open_channel(&self, session: &Session, command: &str) -> TransportResult<Channel> {
        let (local, remote) = tokio::io::duplex(CHANNEL_BUFFER);
        let (stdout, stdin) = tokio::io::split(local);

        let mut state = self.state();
        state.journal.push(TransportCall::OpenChannel {
            host: session.host.clone(),
            command: command.to_string(),
        });
        if command.contains("instance/preempted") {
            state.watch_ends.insert(session.host.clone(), remote);
        } else {
            state.agent_ends.insert(session.host.clone(), remote);
        }

        Ok(Channel {
            stdout: Box::new(stdout),
            stdin: Box::new(stdin),
        })
    }

    async fn close(&self, session: &Session) {
        self.record(TransportCall::Close {
            host: session.host.clone(),
        });
    }
}
