use crate::protocol::ToolInfo;
use schemars::Schema;

mod knowledge_search;
mod weather;

pub use knowledge_search::{KNOWLEDGE_SEARCH, KnowledgeSearchInput, KnowledgeSearchOutput};
pub use weather::{WEATHER, WeatherOutput, WeatherReport};

type OutputParser = fn(serde_json::Value) -> Result<ToolOutput, serde_json::Error>;

#[derive(Debug)]
pub(crate) struct ToolDefinition {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) input_schema: fn() -> Schema,
    pub(crate) parse_output: OutputParser,
}

/// Tool output validated against the schema of the tool that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    KnowledgeSearch(KnowledgeSearchOutput),
    Weather(WeatherOutput),
    /// Output of a tool the registry does not know, or that failed
    /// validation.
    Unrecognized(serde_json::Value),
}

impl ToolOutput {
    /// Error reported by the tool itself. The call still completed.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            ToolOutput::KnowledgeSearch(KnowledgeSearchOutput::Failed { error })
            | ToolOutput::Weather(WeatherOutput::Failed { error }) => Some(error),
            ToolOutput::Unrecognized(value) => value.get("error").and_then(|e| e.as_str()),
            _ => None,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            ToolOutput::KnowledgeSearch(output) => output.summary(),
            ToolOutput::Weather(output) => output.summary(),
            ToolOutput::Unrecognized(value) => {
                let text = value.to_string();
                if text.len() > 120 {
                    let mut end = 120;
                    while !text.is_char_boundary(end) {
                        end -= 1;
                    }
                    format!("{}...", &text[..end])
                } else {
                    text
                }
            }
        }
    }
}

/// Lookup from tool name to its schema and output parser.
#[derive(Debug)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl ToolRegistry {
    pub fn builtin() -> Self {
        Self {
            tools: vec![knowledge_search::definition(), weather::definition()],
        }
    }

    fn find(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    /// Validates `output` for `name`. Unknown tools pass through untouched.
    pub fn parse_output(
        &self,
        name: &str,
        output: serde_json::Value,
    ) -> Result<ToolOutput, serde_json::Error> {
        match self.find(name) {
            Some(tool) => (tool.parse_output)(output),
            None => Ok(ToolOutput::Unrecognized(output)),
        }
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|tool| ToolInfo {
                name: tool.name.to_string(),
                description: tool.description.to_string(),
                input_schema: (tool.input_schema)().to_value(),
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
