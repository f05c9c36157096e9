use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};

use super::{ToolDefinition, ToolOutput};

pub const WEATHER: &str = "getWeather";

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct WeatherInput {
    #[schemars(description = "City or place name to report the weather for.")]
    location: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WeatherReport {
    pub location: String,
    pub temperature: f64,
    #[serde(default = "default_unit")]
    pub unit: String,
    pub condition: String,
}

fn default_unit() -> String {
    "celsius".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum WeatherOutput {
    Report(WeatherReport),
    Failed { error: String },
}

impl WeatherOutput {
    pub fn summary(&self) -> String {
        match self {
            WeatherOutput::Report(report) => format!(
                "{}: {} {} ({})",
                report.location, report.temperature, report.unit, report.condition
            ),
            WeatherOutput::Failed { error } => format!("weather lookup failed: {}", error),
        }
    }
}

fn parse_output(output: serde_json::Value) -> Result<ToolOutput, serde_json::Error> {
    serde_json::from_value(output).map(ToolOutput::Weather)
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: WEATHER,
        description: "Get the current weather for a location.",
        input_schema: || schema_for!(WeatherInput),
        parse_output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn report_defaults_to_celsius() {
        let output = parse_output(json!({
            "location": "Lisbon",
            "temperature": 21.5,
            "condition": "sunny"
        }))
        .unwrap();

        assert_eq!(output.summary(), "Lisbon: 21.5 celsius (sunny)");
    }

    #[test]
    fn failure_shape_is_recognized() {
        let output = parse_output(json!({"error": "unknown location"})).unwrap();
        assert_eq!(output.error_message(), Some("unknown location"));
    }
}
