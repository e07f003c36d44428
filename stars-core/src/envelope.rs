//! Wire envelope: the typed messages that cross the peer boundary
//! (spec.md §6), plus their conversion to/from the generated protobuf
//! types in [`crate::proto`].
//!
//! Follows the dual-representation pattern the teacher's `task.rs` uses
//! for `Task`/`SchedTask`: a rich, idiomatic type for in-process use
//! (`Envelope`), converted explicitly to/from the wire type at the
//! transport boundary. Application code never touches `proto::stars_v1`
//! directly.

use crate::address::Address;
use crate::error::TransportError;
use crate::proto::stars_v1;
use crate::task::TaskDescription;
use crate::time::Time;

#[derive(Debug, Clone, PartialEq)]
pub struct TaskBagMsg {
    pub request_id: u64,
    pub requester: Address,
    pub first_task: u32,
    pub last_task: u32,
    pub req: TaskDescription,
    /// True when this bag has reached its destination execution leaf.
    pub for_en: bool,
    /// True when this bag originated at a local executor rather than
    /// being forwarded by the overlay.
    pub from_en: bool,
    /// Carried only under the FSP policy (spec.md §6).
    pub estimated_slowness: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskAcceptedMsg {
    pub request_id: u64,
    pub first_local_task: u32,
    pub last_local_task: u32,
    pub executor: Address,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskFinishedMsg {
    pub request_id: u64,
    pub local_task: u32,
    pub executor: Address,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskAbortedMsg {
    pub request_id: u64,
    pub local_task: u32,
    pub executor: Address,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilityUpdateMsg {
    pub policy_tag: String,
    pub summary_bytes: Vec<u8>,
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatMsg {
    pub instance_id: u64,
    pub remaining: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchCommandMsg {
    pub app_name: String,
    pub deadline: Time,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestTimeoutMsg {
    pub request_id: u64,
}

/// One message crossing the peer boundary, tagged by payload, carrying
/// the sender's address (spec.md §6).
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    TaskBag(Address, TaskBagMsg),
    TaskAccepted(Address, TaskAcceptedMsg),
    TaskFinished(Address, TaskFinishedMsg),
    TaskAborted(Address, TaskAbortedMsg),
    AvailabilityUpdate(Address, AvailabilityUpdateMsg),
    Heartbeat(Address, HeartbeatMsg),
    /// Local-only: never crosses the wire, injected directly at a
    /// submitter (spec.md §6).
    DispatchCommand(DispatchCommandMsg),
    /// Local-only: fired by the timer queue, never sent.
    RequestTimeout(RequestTimeoutMsg),
}

impl Envelope {
    /// The sender, when this envelope crossed the wire at all.
    pub fn from_addr(&self) -> Option<Address> {
        match self {
            Envelope::TaskBag(a, _)
            | Envelope::TaskAccepted(a, _)
            | Envelope::TaskFinished(a, _)
            | Envelope::TaskAborted(a, _)
            | Envelope::AvailabilityUpdate(a, _)
            | Envelope::Heartbeat(a, _) => Some(*a),
            Envelope::DispatchCommand(_) | Envelope::RequestTimeout(_) => None,
        }
    }
}

fn encode_addr(a: Address) -> stars_v1::AddressMsg {
    stars_v1::AddressMsg {
        ip: a.ip_u32(),
        port: a.port() as u32,
    }
}

fn decode_addr(m: Option<stars_v1::AddressMsg>) -> Result<Address, TransportError> {
    let m = m.ok_or_else(|| TransportError::Malformed {
        from: Address::from_u32(0, 0),
        reason: "missing address".to_string(),
    })?;
    Ok(Address::from_u32(m.ip, m.port as u16))
}

impl From<&TaskDescription> for stars_v1::TaskDescriptionMsg {
    fn from(d: &TaskDescription) -> Self {
        stars_v1::TaskDescriptionMsg {
            min_memory_mb: d.min_memory_mb,
            min_disk_mb: d.min_disk_mb,
            num_tasks: d.num_tasks,
            length: d.length,
            input_bytes: d.input_bytes,
            output_bytes: d.output_bytes,
            deadline_us: d.deadline.as_micros(),
        }
    }
}

impl From<stars_v1::TaskDescriptionMsg> for TaskDescription {
    fn from(m: stars_v1::TaskDescriptionMsg) -> Self {
        TaskDescription {
            min_memory_mb: m.min_memory_mb,
            min_disk_mb: m.min_disk_mb,
            num_tasks: m.num_tasks,
            length: m.length,
            input_bytes: m.input_bytes,
            output_bytes: m.output_bytes,
            deadline: Time::from_micros(m.deadline_us),
        }
    }
}

impl From<&Envelope> for stars_v1::Envelope {
    fn from(env: &Envelope) -> Self {
        use stars_v1::envelope::Payload;

        let from = env.from_addr().unwrap_or(Address::from_u32(0, 0));
        let payload = match env {
            Envelope::TaskBag(_, m) => Payload::TaskBag(stars_v1::TaskBag {
                request_id: m.request_id,
                requester: Some(encode_addr(m.requester)),
                first_task: m.first_task,
                last_task: m.last_task,
                req: Some((&m.req).into()),
                for_en: m.for_en,
                from_en: m.from_en,
                estimated_slowness: m.estimated_slowness,
            }),
            Envelope::TaskAccepted(_, m) => Payload::TaskAccepted(stars_v1::TaskAccepted {
                request_id: m.request_id,
                first_local_task: m.first_local_task,
                last_local_task: m.last_local_task,
                executor: Some(encode_addr(m.executor)),
            }),
            Envelope::TaskFinished(_, m) => Payload::TaskFinished(stars_v1::TaskFinished {
                request_id: m.request_id,
                local_task: m.local_task,
                executor: Some(encode_addr(m.executor)),
            }),
            Envelope::TaskAborted(_, m) => Payload::TaskAborted(stars_v1::TaskAborted {
                request_id: m.request_id,
                local_task: m.local_task,
                executor: Some(encode_addr(m.executor)),
            }),
            Envelope::AvailabilityUpdate(_, m) => {
                Payload::AvailabilityUpdate(stars_v1::AvailabilityUpdate {
                    policy_tag: m.policy_tag.clone(),
                    summary_bytes: m.summary_bytes.clone(),
                    sequence: m.sequence,
                })
            }
            Envelope::Heartbeat(_, m) => Payload::Heartbeat(stars_v1::Heartbeat {
                instance_id: m.instance_id,
                remaining: m.remaining,
            }),
            Envelope::DispatchCommand(m) => Payload::DispatchCommand(stars_v1::DispatchCommand {
                app_name: m.app_name.clone(),
                deadline_us: m.deadline.as_micros(),
            }),
            Envelope::RequestTimeout(m) => Payload::RequestTimeout(stars_v1::RequestTimeout {
                request_id: m.request_id,
            }),
        };

        stars_v1::Envelope {
            from: Some(encode_addr(from)),
            payload: Some(payload),
        }
    }
}

impl TryFrom<stars_v1::Envelope> for Envelope {
    type Error = TransportError;

    fn try_from(wire: stars_v1::Envelope) -> Result<Self, Self::Error> {
        use stars_v1::envelope::Payload;

        let from = decode_addr(wire.from)?;
        let payload = wire.payload.ok_or_else(|| TransportError::Malformed {
            from,
            reason: "missing payload".to_string(),
        })?;

        Ok(match payload {
            Payload::TaskBag(m) => Envelope::TaskBag(
                from,
                TaskBagMsg {
                    request_id: m.request_id,
                    requester: decode_addr(m.requester)?,
                    first_task: m.first_task,
                    last_task: m.last_task,
                    req: m
                        .req
                        .ok_or_else(|| TransportError::Malformed {
                            from,
                            reason: "task bag missing description".to_string(),
                        })?
                        .into(),
                    for_en: m.for_en,
                    from_en: m.from_en,
                    estimated_slowness: m.estimated_slowness,
                },
            ),
            Payload::TaskAccepted(m) => Envelope::TaskAccepted(
                from,
                TaskAcceptedMsg {
                    request_id: m.request_id,
                    first_local_task: m.first_local_task,
                    last_local_task: m.last_local_task,
                    executor: decode_addr(m.executor)?,
                },
            ),
            Payload::TaskFinished(m) => Envelope::TaskFinished(
                from,
                TaskFinishedMsg {
                    request_id: m.request_id,
                    local_task: m.local_task,
                    executor: decode_addr(m.executor)?,
                },
            ),
            Payload::TaskAborted(m) => Envelope::TaskAborted(
                from,
                TaskAbortedMsg {
                    request_id: m.request_id,
                    local_task: m.local_task,
                    executor: decode_addr(m.executor)?,
                },
            ),
            Payload::AvailabilityUpdate(m) => Envelope::AvailabilityUpdate(
                from,
                AvailabilityUpdateMsg {
                    policy_tag: m.policy_tag,
                    summary_bytes: m.summary_bytes,
                    sequence: m.sequence,
                },
            ),
            Payload::Heartbeat(m) => Envelope::Heartbeat(
                from,
                HeartbeatMsg {
                    instance_id: m.instance_id,
                    remaining: m.remaining,
                },
            ),
            Payload::DispatchCommand(m) => Envelope::DispatchCommand(DispatchCommandMsg {
                app_name: m.app_name,
                deadline: Time::from_micros(m.deadline_us),
            }),
            Payload::RequestTimeout(m) => {
                Envelope::RequestTimeout(RequestTimeoutMsg { request_id: m.request_id })
            }
        })
    }
}
