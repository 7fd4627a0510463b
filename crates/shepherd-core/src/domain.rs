//! Domain entities as named in the data model: Systems, Services, VMs,
//! approval tickets, the domain event log, queue jobs, audit records and
//! notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

/// `System` — top-level logical container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct System {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `Service` — child of a System; mints VM instance indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub system_id: Uuid,
    pub name: String,
    pub description: String,
    /// The next instance index to allocate. Mutated only via the
    /// conditional `UPDATE ... RETURNING old` described in spec §4.5.
    pub next_instance_index: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The fixed set of states a VM resource row can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VmStatus {
    Creating,
    Running,
    Stopping,
    Stopped,
    Paused,
    Migrating,
    Failed,
    Deleting,
    /// Tombstone left behind after a successful delete, per the Open
    /// Question resolution in SPEC_FULL.md §9.1. Swept by a periodic
    /// maintenance job once the retention window elapses.
    Deleted,
}

/// `VM` — the platform's record of a virtual machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vm {
    pub id: Uuid,
    pub name: String,
    pub service_id: Uuid,
    pub instance_index: i64,
    pub namespace: String,
    pub cluster_id: Uuid,
    pub hostname: Option<String>,
    pub ticket_id: Uuid,
    pub status: VmStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The closed set of operation kinds a ticket/event pair can carry. Adding a
/// new kind requires a new variant here, its payload schema, and its worker
/// (spec §9 "Polymorphism over operation kinds").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Create,
    Delete,
    Power,
    Vnc,
    BatchParent,
    BatchChild,
}

/// Ticket lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Executing,
    Success,
    Failed,
    /// Batch-parent-only terminal state: some children succeeded, some
    /// failed.
    PartialSuccess,
}

/// `ApprovalTicket` — the governance wrapper around a DomainEvent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalTicket {
    pub id: Uuid,
    pub operation_type: OperationType,
    pub status: TicketStatus,
    pub event_id: Uuid,
    pub requester: String,
    pub approver: Option<String>,
    pub parent_ticket_id: Option<Uuid>,

    /// User-adjustable fields captured at submission.
    pub request_params: Json,

    /// Admin-bound fields, set only at approval.
    pub selected_cluster_id: Option<Uuid>,
    pub selected_storage_class: Option<String>,
    pub selected_template_version: Option<String>,

    /// Flat dotted-path overrides applied on top of the snapshots at
    /// execution time.
    pub modified_spec: Json,

    /// Immutable snapshots of the Template and InstanceSize selected at
    /// approval, isolating execution from subsequent edits to either.
    pub template_snapshot: Option<Json>,
    pub instance_size_snapshot: Option<Json>,

    pub rejection_reason: Option<String>,

    /// Aggregate counters, populated only for `BatchParent` tickets.
    pub batch_total: i32,
    pub batch_success: i32,
    pub batch_failed: i32,
    pub batch_pending: i32,
    pub batch_cancelled: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalTicket {
    /// Recomputes the aggregate batch status from its counters, per spec
    /// §4.8: all success -> COMPLETED-equivalent (`Success`), all failed ->
    /// `Failed`, mixed -> `PartialSuccess`, otherwise still in flight.
    ///
    /// Returns `None` while children are still pending (the parent is not
    /// yet terminal).
    pub fn recompute_batch_status(&self) -> Option<TicketStatus> {
        let settled = self.batch_success + self.batch_failed + self.batch_cancelled;
        if settled < self.batch_total {
            return None;
        }
        if self.batch_pending > 0 {
            return None;
        }
        Some(if self.batch_failed == 0 && self.batch_cancelled == 0 {
            TicketStatus::Success
        } else if self.batch_success == 0 {
            TicketStatus::Failed
        } else {
            TicketStatus::PartialSuccess
        })
    }
}

/// Domain event lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// `DomainEvent` — the append-only, immutable business-intent record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub event_type: OperationType,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    /// The authoritative request body captured at submission. Never
    /// mutated after insert; only `status` changes across the event's
    /// lifetime.
    pub payload: Json,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `AuditRecord` — append-only, retained independently of resource rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub action: String,
    pub actor_id: String,
    pub resource_type: String,
    pub resource_id: Uuid,
    pub parent_type: Option<String>,
    pub parent_id: Option<Uuid>,
    pub environment: String,
    pub details: Json,
    pub created_at: DateTime<Utc>,
}

/// `Notification` — in-platform inbox entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: String,
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub metadata: Json,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// Canonical audit action names, `{domain}.{verb}`.
pub mod audit_actions {
    pub const VM_REQUEST: &str = "vm.request";
    pub const VM_DELETE_SUBMITTED: &str = "vm.delete_submitted";
    pub const VM_DELETE_APPROVED: &str = "vm.delete_approved";
    pub const VM_DELETE_EXECUTED: &str = "vm.delete_executed";
    pub const VM_DELETE_FAILED: &str = "vm.delete_failed";
    pub const VM_CREATE: &str = "vm.create";
    pub const VM_CREATE_FAILED: &str = "vm.create_failed";
    pub const VM_POWER: &str = "vm.power";
    pub const VM_POWER_FAILED: &str = "vm.power_failed";
    pub const APPROVAL_APPROVE: &str = "approval.approve";
    pub const APPROVAL_REJECT: &str = "approval.reject";
    pub const VNC_ACCESS: &str = "vnc.access";
    pub const VNC_ACCESS_REQUESTED: &str = "vnc.access_requested";
}
