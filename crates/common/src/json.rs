/// Parameters, outputs, and trigger payloads are all untyped JSON in the
/// wire format; every layer above the handler boundary passes this type
/// around rather than erasing it into an opaque blob.
pub type JsonValue = serde_json::Value;
