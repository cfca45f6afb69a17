//! In-process store backend. Backs unit and integration tests, and any
//! embedding that does not need durability.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    apply_query, resolve_patch, server_timestamp, CommitOutcome, DocPath, Document, DocumentStore,
    Fields, Query, ReadRecord, StoreResult, Write,
};

#[derive(Debug, Clone)]
struct StoredDoc {
    fields: Fields,
    version: u64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<DocPath, StoredDoc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().expect("memory store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>> {
        let docs = self.docs.lock().expect("memory store poisoned");
        Ok(docs.get(path).map(|stored| Document {
            path: path.clone(),
            fields: stored.fields.clone(),
            version: stored.version,
        }))
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        let docs = self.docs.lock().expect("memory store poisoned");
        let collected = docs
            .iter()
            .filter(|(path, _)| path.collection() == query.collection)
            .map(|(path, stored)| Document {
                path: path.clone(),
                fields: stored.fields.clone(),
                version: stored.version,
            })
            .collect();
        Ok(apply_query(collected, query))
    }

    async fn try_commit(
        &self,
        reads: &[ReadRecord],
        writes: &[Write],
    ) -> StoreResult<CommitOutcome> {
        let mut docs = self.docs.lock().expect("memory store poisoned");

        for (path, observed) in reads {
            let current = docs.get(path).map(|stored| stored.version);
            if current != *observed {
                return Ok(CommitOutcome::Conflict);
            }
        }

        let now = server_timestamp();
        for write in writes {
            match write {
                Write::Set { path, patch } => {
                    let version = docs.get(path).map(|d| d.version).unwrap_or(0) + 1;
                    let fields = resolve_patch(None, patch, &now);
                    docs.insert(path.clone(), StoredDoc { fields, version });
                }
                Write::Merge { path, patch } => {
                    let (current, version) = match docs.get(path) {
                        Some(stored) => (Some(&stored.fields), stored.version + 1),
                        None => (None, 1),
                    };
                    let fields = resolve_patch(current, patch, &now);
                    docs.insert(path.clone(), StoredDoc { fields, version });
                }
                Write::Delete { path } => {
                    docs.remove(path);
                }
            }
        }

        Ok(CommitOutcome::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{run_transaction, Direction, Patch, StoreError};
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn seed(store: &MemoryStore, path: &str, patch: Patch) {
        crate::store::apply(store, Write::Merge {
            path: DocPath::new(path),
            patch,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn merge_creates_and_updates() {
        let store = MemoryStore::new();
        seed(&store, "users/u1", Patch::new().set("totalLikes", 0)).await;
        seed(&store, "users/u1", Patch::new().increment("totalLikes", 2.0)).await;

        let doc = store.get(&DocPath::new("users/u1")).await.unwrap().unwrap();
        assert_eq!(doc.i64_field("totalLikes"), Some(2));
        assert_eq!(doc.version, 2);
    }

    #[tokio::test]
    async fn delete_removes_document() {
        let store = MemoryStore::new();
        seed(&store, "users/u1", Patch::new().set("x", 1)).await;
        crate::store::apply(&store, Write::Delete {
            path: DocPath::new("users/u1"),
        })
        .await
        .unwrap();
        assert!(store.get(&DocPath::new("users/u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_scopes_to_exact_collection() {
        let store = MemoryStore::new();
        seed(&store, "images/i1", Patch::new().set("likes", 1)).await;
        seed(&store, "images/i1/likes/u1", Patch::new().set("userId", "u1")).await;

        let top = store.query(&Query::collection("images")).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].path.as_str(), "images/i1");

        let nested = store
            .query(&Query::collection("images/i1/likes"))
            .await
            .unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].id(), "u1");
    }

    #[tokio::test]
    async fn commit_conflicts_when_read_doc_changed() {
        let store = MemoryStore::new();
        seed(&store, "users/u1", Patch::new().set("count", 1)).await;

        let doc = store.get(&DocPath::new("users/u1")).await.unwrap().unwrap();
        let reads = vec![(doc.path.clone(), Some(doc.version))];

        // Interfering writer bumps the version before our commit
        seed(&store, "users/u1", Patch::new().increment("count", 1.0)).await;

        let outcome = store
            .try_commit(&reads, &[Write::Merge {
                path: DocPath::new("users/u1"),
                patch: Patch::new().set("count", 99),
            }])
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Conflict);

        // Nothing applied
        let doc = store.get(&DocPath::new("users/u1")).await.unwrap().unwrap();
        assert_eq!(doc.i64_field("count"), Some(2));
    }

    #[tokio::test]
    async fn commit_conflicts_when_absent_doc_appeared() {
        let store = MemoryStore::new();
        let reads = vec![(DocPath::new("usernames/jane"), None)];
        seed(&store, "usernames/jane", Patch::new().set("userId", "u2")).await;

        let outcome = store.try_commit(&reads, &[]).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Conflict);
    }

    #[tokio::test]
    async fn transaction_retries_until_interference_stops() {
        let store = MemoryStore::new();
        seed(&store, "images/i1", Patch::new().set("likes", 0)).await;

        let attempts = AtomicU32::new(0);
        let result: Result<i64, StoreError> = run_transaction(&store, |txn| {
            let attempts = &attempts;
            let store = &store;
            Box::pin(async move {
                let doc = txn.get(&DocPath::new("images/i1")).await?.unwrap();
                let likes = doc.i64_field("likes").unwrap_or(0);
                // First attempt loses a race against another writer
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    crate::store::apply(store, Write::Merge {
                        path: DocPath::new("images/i1"),
                        patch: Patch::new().increment("likes", 10.0),
                    })
                    .await?;
                }
                txn.merge(
                    DocPath::new("images/i1"),
                    Patch::new().increment("likes", 1.0),
                );
                Ok(likes + 1)
            })
        })
        .await;

        // Second attempt observed the interfering increment and committed
        assert_eq!(result.unwrap(), 11);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        let doc = store.get(&DocPath::new("images/i1")).await.unwrap().unwrap();
        assert_eq!(doc.i64_field("likes"), Some(11));
    }

    #[tokio::test]
    async fn transaction_gives_up_after_bounded_attempts() {
        let store = MemoryStore::new();
        seed(&store, "images/i1", Patch::new().set("likes", 0)).await;

        let result: Result<(), StoreError> = run_transaction(&store, |txn| {
            let store = &store;
            Box::pin(async move {
                txn.get(&DocPath::new("images/i1")).await?;
                // A writer that always wins the race
                crate::store::apply(store, Write::Merge {
                    path: DocPath::new("images/i1"),
                    patch: Patch::new().increment("likes", 1.0),
                })
                .await?;
                txn.merge(DocPath::new("images/i1"), Patch::new().set("likes", 0));
                Ok(())
            })
        })
        .await;

        assert!(matches!(result, Err(StoreError::Contention(_))));
    }

    #[tokio::test]
    async fn ordered_query_with_limit_and_cursor() {
        let store = MemoryStore::new();
        for (id, created) in [("a", "2026-01-01"), ("b", "2026-01-02"), ("c", "2026-01-03")] {
            seed(
                &store,
                &format!("users/u1/notifications/{id}"),
                Patch::new().set("createdAt", created).set("read", false),
            )
            .await;
        }

        let first = store
            .query(
                &Query::collection("users/u1/notifications")
                    .order_by("createdAt", Direction::Desc)
                    .limit(2),
            )
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].id(), "c");

        let rest = store
            .query(
                &Query::collection("users/u1/notifications")
                    .order_by("createdAt", Direction::Desc)
                    .start_after(first[1].path.clone()),
            )
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id(), "a");
    }
}
