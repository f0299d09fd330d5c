//! fleet-bootstrap — turn a running instance into a connected build agent.
//!
//! The remote shell itself is a boundary ([`RemoteTransport`]); this crate
//! only drives it. [`BootstrapExecutor::bootstrap`] runs the whole protocol
//! for one instance:
//!
//! ```text
//! loop {
//!     connect(host, port, 10s)      ── error ──→ sleep 5s, retry
//!     authenticate(user, credential) ── false ──→ sleep 5s, retry
//! }
//! [wait_for_startup_script]  exec("test -f …/.startup-script-finished") until 0
//! exec(mkdir remote_fs)
//! copy_file(agent payload)
//! open_channel(java -jar agent)  ──→ AgentConnection { session, channel }
//! ```
//!
//! Retries are unbounded here; the launcher wraps the call in the
//! template's launch timeout and tears the instance down when it fires.
//!
//! [`SimulatedTransport`] stands in for a real SSH/WinRM client in the
//! daemon's simulated backend and in tests.

pub mod error;
pub mod executor;
pub mod simulated;
pub mod transport;

pub use error::{BootstrapError, BootstrapResult, TransportError, TransportResult};
pub use executor::{AgentConnection, AgentPayload, BootstrapExecutor, BootstrapSettings};
pub use simulated::{HostBehavior, SimulatedTransport, TransportCall};
pub use transport::{Channel, RemoteTransport, Session, preemption_watch_command};
