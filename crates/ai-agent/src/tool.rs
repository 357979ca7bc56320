use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Static metadata a tool source advertises for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub description: String,
    pub required: bool,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Parameters declared under the schema's `properties`, flagged with
    /// whether `required` lists them.
    pub fn parameters(&self) -> IndexMap<String, ParameterSpec> {
        let required: Vec<&str> = self
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let Some(properties) = self
            .input_schema
            .get("properties")
            .and_then(Value::as_object)
        else {
            return IndexMap::new();
        };

        properties
            .iter()
            .map(|(name, schema)| {
                let description = schema
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("No description")
                    .to_string();
                let spec = ParameterSpec {
                    description,
                    required: required.contains(&name.as_str()),
                };
                (name.clone(), spec)
            })
            .collect()
    }

    /// Renders the descriptor in the block format agents embed in their
    /// system prompts.
    pub fn format_for_llm(&self) -> String {
        let mut out = format!(
            "Tool: {}\nDescription: {}\nArguments:",
            self.name, self.description
        );
        for (name, spec) in self.parameters() {
            out.push_str(&format!("\n- {}: {}", name, spec.description));
            if spec.required {
                out.push_str(" (required)");
            }
        }
        out.push('\n');
        out
    }
}

/// A request from the model to invoke a named tool.
///
/// The wire form is a JSON object with exactly the keys `tool` and
/// `arguments`; anything else is treated as plain text by [`ToolCall::parse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCall {
    pub tool: String,
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            tool: tool.into(),
            arguments,
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        // Structs also deserialize from JSON arrays, so insist on an object.
        match serde_json::from_str::<Value>(text.trim()).ok()? {
            value @ Value::Object(_) => serde_json::from_value(value).ok(),
            _ => None,
        }
    }

    pub fn argument_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}
