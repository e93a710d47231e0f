//! Bounded in-memory store for recent extraction results.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use crate::schema::ExtractionResult;

#[derive(Debug, Default)]
struct Inner {
    results: HashMap<String, ExtractionResult>,
    /// Ids in insertion order, oldest first.
    order: VecDeque<String>,
}

/// Keeps the most recent `capacity` results; older ones are evicted.
#[derive(Debug, Clone)]
pub struct ResultStore {
    inner: Arc<RwLock<Inner>>,
    capacity: usize,
}

impl ResultStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&self, result: ExtractionResult) {
        let mut inner = self.inner.write().unwrap();
        let id = result.id.clone();
        if inner.results.insert(id.clone(), result).is_none() {
            inner.order.push_back(id);
        }
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.results.remove(&evicted);
                tracing::debug!("ResultStore: evicted '{}'", evicted);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<ExtractionResult> {
        self.inner.read().unwrap().results.get(id).cloned()
    }

    /// Results routed to review, newest first.
    pub fn pending_review(&self) -> Vec<ExtractionResult> {
        let inner = self.inner.read().unwrap();
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.results.get(id))
            .filter(|r| r.needs_review())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().results.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        ExtractionInput, InputSource, Intent, LlmMeta, ParsedTransaction, SanityReport,
    };

    fn result(needs_review: bool) -> ExtractionResult {
        ExtractionResult::new(
            ExtractionInput {
                user_id: 1,
                source: InputSource::Text,
                input_text: "kopi 18rb".to_string(),
                content_hash: "hash".to_string(),
                prompt: "prompt".to_string(),
                ocr: None,
            },
            ParsedTransaction {
                intent: Intent::Expense,
                amount: 18000.0,
                currency: "IDR".to_string(),
                date: None,
                category: "minuman".to_string(),
                note: String::new(),
                confidence: 0.9,
                raw_output: String::new(),
            },
            SanityReport {
                needs_review,
                flags: Vec::new(),
                adjusted_confidence: 0.9,
                warnings: Vec::new(),
                normalized_category: "minuman".to_string(),
                normalized_date: None,
            },
            LlmMeta {
                model: "test".to_string(),
                attempts: 1,
                prompt_tokens: None,
                completion_tokens: None,
            },
        )
    }

    #[test]
    fn test_store_and_retrieve() {
        let store = ResultStore::new(10);
        let stored = result(false);
        store.insert(stored.clone());
        assert_eq!(store.get(&stored.id).unwrap().id, stored.id);
        assert!(store.get("trx_missing").is_none());
    }

    #[test]
    fn test_evicts_oldest() {
        let store = ResultStore::new(2);
        let first = result(false);
        let second = result(false);
        let third = result(false);
        store.insert(first.clone());
        store.insert(second.clone());
        store.insert(third.clone());

        assert_eq!(store.len(), 2);
        assert!(store.get(&first.id).is_none());
        assert!(store.get(&third.id).is_some());
    }

    #[test]
    fn test_pending_review_newest_first() {
        let store = ResultStore::new(10);
        let older = result(true);
        let confirmed = result(false);
        let newer = result(true);
        store.insert(older.clone());
        store.insert(confirmed);
        store.insert(newer.clone());

        let ids: Vec<String> = store.pending_review().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }
}
