use crate::protocol::RetrievedDocument;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};

use super::{ToolDefinition, ToolOutput};

pub const KNOWLEDGE_SEARCH: &str = "searchKnowledgeBase";

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct KnowledgeSearchInput {
    #[schemars(description = "Free-text query matched against knowledge base documents.")]
    pub query: String,
    #[schemars(description = "Maximum number of documents to return.")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Either the matching documents or the retrieval failure.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum KnowledgeSearchOutput {
    Documents(Vec<RetrievedDocument>),
    Failed { error: String },
}

impl KnowledgeSearchOutput {
    pub fn summary(&self) -> String {
        match self {
            KnowledgeSearchOutput::Documents(docs) if docs.is_empty() => {
                "no matching documents".to_string()
            }
            KnowledgeSearchOutput::Documents(docs) => {
                let titles: Vec<&str> = docs.iter().map(|doc| doc.title.as_str()).collect();
                format!("{} document(s): {}", docs.len(), titles.join(", "))
            }
            KnowledgeSearchOutput::Failed { error } => format!("search failed: {}", error),
        }
    }
}

fn parse_output(output: serde_json::Value) -> Result<ToolOutput, serde_json::Error> {
    serde_json::from_value(output).map(ToolOutput::KnowledgeSearch)
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: KNOWLEDGE_SEARCH,
        description: "Search the knowledge base for documents relevant to a query.",
        input_schema: || schema_for!(KnowledgeSearchInput),
        parse_output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_document_list() {
        let output = parse_output(json!([
            {"id": "doc_1", "title": "Onboarding", "content": "Welcome", "score": 0.5}
        ]))
        .unwrap();

        match output {
            ToolOutput::KnowledgeSearch(KnowledgeSearchOutput::Documents(docs)) => {
                assert_eq!(docs.len(), 1);
                assert_eq!(docs[0].title, "Onboarding");
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(parse_output(json!([{"title": 3}])).is_err());
        assert!(parse_output(json!("nope")).is_err());
    }

    #[test]
    fn summary_names_documents() {
        let output = KnowledgeSearchOutput::Documents(vec![RetrievedDocument {
            id: "a".to_string(),
            title: "Pricing".to_string(),
            content: String::new(),
            score: 1.0,
        }]);
        assert_eq!(output.summary(), "1 document(s): Pricing");
    }
}
