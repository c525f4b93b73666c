use opentelemetry::trace::{SpanId, TraceId};
use rand::{rngs::OsRng, TryRngCore};
use uuid::Uuid;

/// Random, non-zero bytes from the OS generator. Falls back to UUIDv4 bytes when the OS generator
/// is unavailable.
fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    loop {
        if let Err(err) = OsRng.try_fill_bytes(&mut bytes) {
            tracing::debug!(error = %err, "os random generator failed, using uuid bytes");
            fill_from_uuid(&mut bytes);
        }
        if bytes.iter().any(|b| *b != 0) {
            return bytes;
        }
    }
}

fn fill_from_uuid(bytes: &mut [u8]) {
    for chunk in bytes.chunks_mut(16) {
        let uuid = Uuid::new_v4();
        chunk.copy_from_slice(&uuid.as_bytes()[..chunk.len()]);
    }
}

pub(crate) fn new_trace_id() -> TraceId {
    TraceId::from_bytes(random_bytes::<16>())
}

pub(crate) fn new_span_id() -> SpanId {
    SpanId::from_bytes(random_bytes::<8>())
}

/// 16 lowercase hex chars.
pub(crate) fn new_item_id() -> String {
    new_span_id().to_string()
}

/// Operation id for items tracked outside of any correlation context.
pub(crate) fn new_operation_id() -> String {
    Uuid::new_v4().simple().to_string()
}
