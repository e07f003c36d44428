//! Structured error types for STaRS, one enum per failure layer (spec.md
//! §7), following the split the teacher's `scheduler/error.rs` uses between
//! a low-level reason enum and a top-level error enum.
//!
//! None of these propagate across peer boundaries as typed values — per
//! spec.md §7 they are absorbed locally (dropped + logged, or surfaced as a
//! `bool`/`Result` to the caller); only [`ConfigError`] is allowed to be
//! fatal, via `anyhow` at the process boundary.

use thiserror::Error;

use crate::address::Address;

/// Kind 1 (spec.md §7): peer unreachable, timeout on connect, malformed
/// message. Always handled by dropping the message and logging; if the
/// target was a child with `Executing` tasks assigned from us, the caller
/// escalates to `deadNode`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer {0} unreachable")]
    Unreachable(Address),
    #[error("timed out connecting to {0}")]
    ConnectTimeout(Address),
    #[error("malformed message from {0}: {reason}")]
    Malformed { from: Address, reason: String },
}

/// Kind 2: message references an unknown request/task, or violates a state
/// transition. Logged as a warning; never aborts the process.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("unknown request id {0}")]
    UnknownRequest(u64),
    #[error("unknown application instance {0}")]
    UnknownInstance(u64),
    #[error("unknown application template {0}")]
    UnknownApp(String),
    #[error("application {0} already exists")]
    AppAlreadyExists(String),
    #[error("task index {task_index} out of range for request {request_id}")]
    TaskIndexOutOfRange { request_id: u64, task_index: u32 },
    #[error("task {task_index} in request {request_id} is in state {actual}, expected {expected}")]
    WrongState {
        request_id: u64,
        task_index: u32,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Kind 3: a leaf cannot host a task at all (not a queue-ordering issue).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResourceError {
    #[error("task requires {required_mb}MB memory but only {available_mb}MB is free")]
    InsufficientMemory { required_mb: u64, available_mb: u64 },
    #[error("task requires {required_mb}MB disk but only {available_mb}MB is free")]
    InsufficientDisk { required_mb: u64, available_mb: u64 },
}

/// Kind 4: a dispatcher cannot place the tasks it was asked to route.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CapacityError {
    #[error("no subtree of this node can host the request")]
    NoCapacity,
    #[error("dropped at root — no capacity anywhere in the tree")]
    DroppedAtRoot,
}

/// Kind 5: invalid configuration at startup. Fatal — propagated via
/// `anyhow` and mapped to a non-zero exit code (spec.md §6).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse configuration file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_messages_are_descriptive() {
        let e = ProtocolError::WrongState {
            request_id: 7,
            task_index: 2,
            expected: "Searching",
            actual: "Ready",
        };
        let msg = e.to_string();
        assert!(msg.contains("Searching"));
        assert!(msg.contains("Ready"));
        assert!(msg.contains('7'));
    }

    #[test]
    fn resource_error_reports_both_values() {
        let e = ResourceError::InsufficientMemory {
            required_mb: 512,
            available_mb: 128,
        };
        assert!(e.to_string().contains("512"));
        assert!(e.to_string().contains("128"));
    }
}
