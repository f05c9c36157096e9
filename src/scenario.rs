use crate::protocol::{ArtifactData, ArtifactKind, RagData, ResponseConfig};
use crate::store::KnowledgeStore;

const SEARCH_LIMIT: usize = 3;

const SAMPLE_CODE: &str = "def fibonacci(n):\n    a, b = 0, 1\n    for _ in range(n):\n        a, b = b, a + b\n    return a\n\n\nif __name__ == \"__main__\":\n    print([fibonacci(i) for i in range(10)])";

const SAMPLE_ESSAY: &str = "# Release notes\n\nThis release focuses on faster streaming.\nMessages now render word by word.\nArtifacts open in a side panel while they are written.";

/// Picks the canned response for a user message.
///
/// Messages mentioning code or a document produce an artifact, messages
/// asking to search the knowledge base produce a retrieval tool call (or a
/// failing one when they also mention a timeout), everything else gets a
/// plain text answer.
pub async fn select_response(message: &str, store: &KnowledgeStore) -> ResponseConfig {
    let lowered = message.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|word| lowered.contains(word));

    if mentions(&["search", "knowledge", "find"]) {
        let query = search_query(message);
        if mentions(&["timeout", "offline", "fail"]) {
            return ResponseConfig::RagError {
                text: "I couldn't reach the knowledge base right now. Please try again in a moment."
                    .to_string(),
                query,
                rag_error: "Connection timeout".to_string(),
            };
        }

        let documents = store.search(&query, SEARCH_LIMIT).await;
        let text = match documents.len() {
            0 => format!("I found nothing in the knowledge base about \"{}\".", query),
            1 => format!("I found one document about \"{}\": {}.", query, documents[0].title),
            n => format!("I found {} documents about \"{}\".", n, query),
        };
        return ResponseConfig::RagSuccess {
            text,
            rag_data: RagData { query, documents },
        };
    }

    if mentions(&["code", "script", "function"]) {
        return ResponseConfig::Artifact {
            text: "I wrote a small Python script that prints the first Fibonacci numbers."
                .to_string(),
            artifact_data: ArtifactData {
                title: "fibonacci.py".to_string(),
                kind: ArtifactKind::Code,
                language: Some("python".to_string()),
                content: SAMPLE_CODE.to_string(),
            },
        };
    }

    if mentions(&["document", "write", "draft", "essay"]) {
        return ResponseConfig::Artifact {
            text: "Here is a first draft of the release notes.".to_string(),
            artifact_data: ArtifactData {
                title: "Release notes".to_string(),
                kind: ArtifactKind::Text,
                language: None,
                content: SAMPLE_ESSAY.to_string(),
            },
        };
    }

    ResponseConfig::Text {
        text: format!(
            "This is a simulated response to: {}. Ask me to search the knowledge base or write some code to see tools and artifacts.",
            message.trim()
        ),
    }
}

fn search_query(message: &str) -> String {
    let trimmed = message.trim();
    for prefix in ["search for", "search", "find"] {
        if let Some(rest) = strip_prefix_ignore_case(trimmed, prefix) {
            let rest = rest.trim();
            if !rest.is_empty() {
                return rest.to_string();
            }
        }
    }
    trimmed.to_string()
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    let rest = text.get(prefix.len()..)?;
    let at_word_end = rest.is_empty() || rest.starts_with(char::is_whitespace);
    if head.eq_ignore_ascii_case(prefix) && at_word_end {
        Some(rest)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_messages_query_the_store() {
        let store = KnowledgeStore::sample();
        let config = select_response("Search pricing plans", &store).await;

        match config {
            ResponseConfig::RagSuccess { rag_data, .. } => {
                assert_eq!(rag_data.query, "pricing plans");
                assert_eq!(rag_data.documents[0].title, "Pricing plans");
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[tokio::test]
    async fn failing_search_yields_rag_error() {
        let store = KnowledgeStore::new();
        let config = select_response("search the knowledge base (simulate timeout)", &store).await;
        assert!(matches!(
            config,
            ResponseConfig::RagError { ref rag_error, .. } if rag_error == "Connection timeout"
        ));
    }

    #[tokio::test]
    async fn code_requests_yield_code_artifacts() {
        let store = KnowledgeStore::new();
        match select_response("write some code", &store).await {
            ResponseConfig::Artifact { artifact_data, .. } => {
                assert_eq!(artifact_data.kind, ArtifactKind::Code);
                assert_eq!(artifact_data.language.as_deref(), Some("python"));
            }
            other => panic!("unexpected config: {:?}", other),
        }

        match select_response("draft a document", &store).await {
            ResponseConfig::Artifact { artifact_data, .. } => {
                assert_eq!(artifact_data.kind, ArtifactKind::Text)
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[tokio::test]
    async fn other_messages_get_text() {
        let store = KnowledgeStore::new();
        let config = select_response("hello there", &store).await;
        assert!(matches!(config, ResponseConfig::Text { .. }));
        assert!(config.text().contains("hello there"));
    }

    #[test]
    fn search_query_strips_command_words() {
        assert_eq!(search_query("search for onboarding"), "onboarding");
        assert_eq!(search_query("Find pricing"), "pricing");
        assert_eq!(search_query("searching docs"), "searching docs");
        assert_eq!(search_query("findings on pricing"), "findings on pricing");
        assert_eq!(search_query("what does the knowledge base say"), "what does the knowledge base say");
    }
}
