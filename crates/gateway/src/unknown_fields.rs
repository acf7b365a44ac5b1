use std::collections::HashMap;

/// Captures arbitrary JSON properties a wire struct doesn't model explicitly,
/// so round-tripping a request/response never silently drops upstream fields.
#[derive(Default, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UnknownFields(HashMap<String, serde_json::Value>);
