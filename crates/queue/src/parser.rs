//! Parse queue message bodies into [`Job`]s.

use serde::Deserialize;
use serde_json::Value;

use netbackup_core::Job;

use crate::consumer::QueueMessage;
use crate::error::QueueError;

/// Wire shape: `{"id": ..., "ip": ..., "device": ...}`. Extra keys are ignored.
#[derive(Debug, Deserialize)]
struct JobPayload {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    ip: Option<Value>,
    #[serde(default)]
    device: Option<Value>,
}

/// `id` may be a string or an integer; control planes often use numeric keys.
fn id_field(v: Option<Value>) -> Option<String> {
    match v? {
        Value::String(s) => Some(s),
        // Zero is the one integer the control plane never issues; treat it as absent.
        Value::Number(n) if n.as_u64() == Some(0) => None,
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

fn text_field(v: Option<Value>) -> Option<String> {
    match v? {
        Value::String(s) => Some(s),
        _ => None,
    }
}

/// Parse a delivery into a [`Job`].
///
/// Rejects bodies that are not a JSON object, and jobs whose `id`, `ip` or
/// `device` is missing, empty or of the wrong type.
pub fn parse_job(msg: &QueueMessage) -> Result<Job, QueueError> {
    let json: Value = serde_json::from_slice(&msg.body).map_err(|e| {
        QueueError::Parse(format!("invalid JSON in delivery {}: {e}", msg.delivery_tag))
    })?;
    if !json.is_object() {
        return Err(QueueError::Parse(format!(
            "delivery {} body is not a JSON object",
            msg.delivery_tag
        )));
    }
    let payload: JobPayload = serde_json::from_value(json)
        .map_err(|e| QueueError::Parse(format!("delivery {}: {e}", msg.delivery_tag)))?;

    let id = id_field(payload.id).filter(|s| !s.is_empty());
    let address = text_field(payload.ip).filter(|s| !s.is_empty());
    let device = text_field(payload.device).filter(|s| !s.is_empty());

    match (id, address, device) {
        (Some(id), Some(address), Some(device)) => Ok(Job {
            id,
            address,
            device,
        }),
        _ => Err(QueueError::Parse(
            "invalid message format, missing id, ip or device field".into(),
        )),
    }
}
