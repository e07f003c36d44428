// SPDX-License-Identifier: MIT

//! STaRS scheduling/routing core.
//!
//! ```text
//! lib.rs
//! ├── address.rs, zone.rs, time.rs   – the 1-D address key space and zones
//! ├── task.rs, remote_task.rs        – leaf-local and submitter-side task state
//! ├── summary/                       – availability summaries (IB/MM/DP/FSP)
//! ├── scheduler/                     – per-leaf local scheduler
//! ├── dispatcher/                    – per-internal-node routing
//! ├── submission/                    – per-submitter bookkeeping
//! ├── propagation.rs                 – throttled upward summary publish
//! ├── overlay.rs                     – father/children/zone contract
//! ├── transport.rs                   – send/recv/timer contract
//! ├── timer.rs                       – timer queue
//! ├── envelope.rs, proto/            – wire messages and their wire encoding
//! ├── config.rs                      – YAML peer configuration
//! ├── error.rs                       – structured error types
//! └── peer.rs                        – ties every component to one event loop
//! ```

pub mod address;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod overlay;
pub mod peer;
pub mod propagation;
pub mod proto;
pub mod remote_task;
pub mod scheduler;
pub mod submission;
pub mod summary;
pub mod task;
pub mod time;
pub mod timer;
pub mod transport;
pub mod zone;
