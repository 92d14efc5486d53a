use schemars::JsonSchema;
use serde::de::DeserializeOwned;

/// Types the model can be forced to produce. The JSON schema is derived via
/// schemars and sent as a tool input schema; the response tool call is
/// deserialized straight into the type.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    fn output_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(Self))
            .unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
    }
}

impl<T> StructuredOutput for T where T: JsonSchema + DeserializeOwned {}
