//! Callable-tool declarations.

use serde::{Deserialize, Serialize};

/// A tool the model may call. The relay never inspects the schema; it is
/// forwarded to the provider as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the tool's parameters.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl ToolDeclaration {
    pub fn new(name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// OpenAI-compatible `{"type": "function", "function": {...}}` wrapper.
    pub fn to_function_tool(&self) -> serde_json::Value {
        let mut function = serde_json::json!({
            "name": self.name,
            "parameters": self.parameters,
        });
        if let Some(desc) = &self.description {
            function["description"] = serde_json::Value::String(desc.clone());
        }
        serde_json::json!({ "type": "function", "function": function })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_function_tool_passes_schema_through() {
        let schema = json!({"type": "object", "properties": {"path": {"type": "string"}}});
        let tool =
            ToolDeclaration::new("read_file", schema.clone()).with_description("Read a file");
        let wrapped = tool.to_function_tool();
        assert_eq!(wrapped["type"], "function");
        assert_eq!(wrapped["function"]["name"], "read_file");
        assert_eq!(wrapped["function"]["description"], "Read a file");
        assert_eq!(wrapped["function"]["parameters"], schema);
    }
}
