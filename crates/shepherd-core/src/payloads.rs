//! Typed shapes for `DomainEvent::payload` (spec §3 "the authoritative
//! request body captured at submission"), one per [`crate::domain::OperationType`]
//! variant. The store and the API layer persist and build these as opaque
//! JSON; `shepherd-worker` is the only consumer that ever deserializes them
//! back (spec §4.7 step 3), since the event payload is otherwise treated as
//! an immutable blob.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::provider::PowerOperation;

/// Payload for a `CREATE` event: everything the worker needs to compose and
/// submit a `VirtualMachine`, captured once at submission time and never
/// mutated (admin-chosen fields like cluster/storage class live on the
/// ticket instead, set only at approval — spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePayload {
    pub service_id: Uuid,
    pub namespace: String,
    pub template_id: Uuid,
    pub instance_size_id: Uuid,
    /// User-adjustable request params (spec §6: "user-adjustable params").
    /// Forbidden fields (cluster id, name, labels, cloud-init) are rejected
    /// before this payload is ever constructed.
    pub params: Json,
    pub reason: String,
}

/// Payload for a `DELETE` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletePayload {
    pub vm_id: Uuid,
    pub reason: String,
}

/// Payload for a `POWER` event. The operation is also mirrored into the
/// queue job's discriminator (spec §9 claim-check), but the payload remains
/// the authoritative source the worker re-parses on every attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerPayload {
    pub vm_id: Uuid,
    pub operation: PowerOperation,
}

/// Payload for a `VNC` event (spec §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VncRequestPayload {
    pub vm_id: Uuid,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn create_payload_round_trips_through_json() {
        let payload = CreatePayload {
            service_id: Uuid::new_v4(),
            namespace: "prod-shop".to_string(),
            template_id: Uuid::new_v4(),
            instance_size_id: Uuid::new_v4(),
            params: json!({"disk": 100}),
            reason: "new redis instance".to_string(),
        };
        let value = serde_json::to_value(&payload).expect("serialize");
        let decoded: CreatePayload = serde_json::from_value(value).expect("deserialize");
        assert_eq!(decoded.namespace, payload.namespace);
        assert_eq!(decoded.params, payload.params);
    }

    #[test]
    fn power_payload_carries_the_operation_discriminator() {
        let payload = PowerPayload {
            vm_id: Uuid::new_v4(),
            operation: PowerOperation::Restart,
        };
        let value = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(value["operation"], json!("restart"));
    }
}
