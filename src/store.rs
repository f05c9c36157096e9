use crate::protocol::RetrievedDocument;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub title: String,
    pub content: String,
}

/// In-memory document collection searched by the mock retrieval tool.
/// Each server or test builds its own.
#[derive(Debug, Default)]
pub struct KnowledgeStore {
    documents: RwLock<Vec<StoredDocument>>,
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents<I, T, C>(documents: I) -> Self
    where
        I: IntoIterator<Item = (T, C)>,
        T: Into<String>,
        C: Into<String>,
    {
        let documents = documents
            .into_iter()
            .map(|(title, content)| StoredDocument {
                id: new_document_id(),
                title: title.into(),
                content: content.into(),
            })
            .collect();
        Self {
            documents: RwLock::new(documents),
        }
    }

    /// A small handbook used by the CLI when no documents are loaded.
    pub fn sample() -> Self {
        Self::with_documents([
            (
                "Getting started",
                "Create a workspace, invite your team and connect a knowledge base to start chatting.",
            ),
            (
                "Pricing plans",
                "The starter plan is free for three members. The team plan adds unlimited projects and artifact history.",
            ),
            (
                "Artifacts",
                "Artifacts are generated documents such as code, text, images or spreadsheets shown in a side panel.",
            ),
        ])
    }

    pub async fn insert(&self, title: impl Into<String>, content: impl Into<String>) -> StoredDocument {
        let document = StoredDocument {
            id: new_document_id(),
            title: title.into(),
            content: content.into(),
        };
        self.documents.write().await.push(document.clone());
        document
    }

    pub async fn list(&self) -> Vec<StoredDocument> {
        self.documents.read().await.clone()
    }

    pub async fn remove(&self, id: &str) -> Option<StoredDocument> {
        let mut documents = self.documents.write().await;
        let idx = documents.iter().position(|doc| doc.id == id)?;
        Some(documents.remove(idx))
    }

    pub async fn clear(&self) {
        self.documents.write().await.clear();
    }

    /// Ranks documents by the share of query terms they contain. Documents
    /// matching no term are left out.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<RetrievedDocument> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let documents = self.documents.read().await;
        let mut hits: Vec<RetrievedDocument> = documents
            .iter()
            .filter_map(|doc| {
                let words = tokenize(&format!("{} {}", doc.title, doc.content));
                let matched = terms.iter().filter(|term| words.contains(term)).count();
                if matched == 0 {
                    return None;
                }
                Some(RetrievedDocument {
                    id: doc.id.clone(),
                    title: doc.title.clone(),
                    content: doc.content.clone(),
                    score: matched as f64 / terms.len() as f64,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        hits
    }
}

fn new_document_id() -> String {
    format!("doc_{}", Uuid::new_v4().simple())
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() > 2)
        .map(|word| word.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_ranks_by_term_overlap() {
        let store = KnowledgeStore::with_documents([
            ("Billing", "Invoices are sent monthly"),
            ("Billing plans", "Plans and invoices"),
            ("Holidays", "Office closed in August"),
        ]);

        let hits = store.search("billing plans", 5).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Billing plans");
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[1].score, 0.5);
    }

    #[tokio::test]
    async fn search_without_terms_is_empty() {
        let store = KnowledgeStore::sample();
        assert!(store.search("a of", 5).await.is_empty());
    }

    #[tokio::test]
    async fn stores_are_independent() {
        let first = KnowledgeStore::new();
        let second = KnowledgeStore::new();

        let doc = first.insert("Runbook", "Restart the worker").await;
        assert_eq!(first.list().await.len(), 1);
        assert!(second.list().await.is_empty());

        assert_eq!(first.remove(&doc.id).await, Some(doc));
        assert!(first.remove("missing").await.is_none());

        first.insert("Runbook", "again").await;
        first.clear().await;
        assert!(first.list().await.is_empty());
    }
}
