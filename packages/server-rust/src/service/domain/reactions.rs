//! In-memory reaction store used as the reference domain.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use relay_core::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{DomainError, DomainService};

const CONTENT_MIN_CHARS: usize = 2;
const CONTENT_MAX_CHARS: usize = 2048;

/// A reaction attached to an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub id: i64,
    pub article_id: i64,
    pub content: String,
}

/// Create/update input after field validation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactionInput {
    article_id: i64,
    content: String,
}

impl ReactionInput {
    fn from_fields(fields: Fields) -> Result<Self, DomainError> {
        let input: ReactionInput = serde_json::from_value(Value::Object(fields))
            .map_err(|e| DomainError::Invalid(e.to_string()))?;

        if input.article_id <= 0 {
            return Err(DomainError::Invalid("articleId must be positive".to_string()));
        }
        if input.content.trim().is_empty() {
            return Err(DomainError::Invalid("content must not be blank".to_string()));
        }
        let chars = input.content.chars().count();
        if !(CONTENT_MIN_CHARS..=CONTENT_MAX_CHARS).contains(&chars) {
            return Err(DomainError::Invalid(format!(
                "content must be {CONTENT_MIN_CHARS}..={CONTENT_MAX_CHARS} characters"
            )));
        }
        Ok(input)
    }
}

/// Reactions keyed by id. Ids start at 1 and are never reused.
pub struct ReactionService {
    reactions: DashMap<i64, Reaction>,
    next_id: AtomicI64,
}

impl ReactionService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            reactions: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.reactions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reactions.is_empty()
    }
}

impl Default for ReactionService {
    fn default() -> Self {
        Self::new()
    }
}

fn to_value(reaction: &Reaction) -> Result<Value, DomainError> {
    serde_json::to_value(reaction).map_err(|e| DomainError::Internal(e.to_string()))
}

#[async_trait]
impl DomainService for ReactionService {
    async fn lookup_all(&self) -> Result<Value, DomainError> {
        let mut all: Vec<Reaction> = self.reactions.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|r| r.id);
        serde_json::to_value(all).map_err(|e| DomainError::Internal(e.to_string()))
    }

    async fn lookup_one(&self, id: i64) -> Result<Value, DomainError> {
        let reaction = self.reactions.get(&id).ok_or(DomainError::NotFound(id))?;
        to_value(&reaction)
    }

    async fn create(&self, fields: Fields) -> Result<Value, DomainError> {
        let input = ReactionInput::from_fields(fields)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let reaction = Reaction {
            id,
            article_id: input.article_id,
            content: input.content,
        };
        let value = to_value(&reaction)?;
        self.reactions.insert(id, reaction);
        debug!(id, "reaction created");
        Ok(value)
    }

    async fn update(&self, id: i64, fields: Fields) -> Result<Value, DomainError> {
        let input = ReactionInput::from_fields(fields)?;
        let mut entry = self.reactions.get_mut(&id).ok_or(DomainError::NotFound(id))?;
        entry.article_id = input.article_id;
        entry.content = input.content;
        to_value(&entry)
    }

    async fn delete(&self, id: i64) -> Result<Value, DomainError> {
        let (_, removed) = self.reactions.remove(&id).ok_or(DomainError::NotFound(id))?;
        debug!(id, "reaction deleted");
        to_value(&removed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[tokio::test]
    async fn create_assigns_increasing_ids() {
        let svc = ReactionService::new();
        let first = svc
            .create(fields(json!({"articleId": 7, "content": "hi"})))
            .await
            .unwrap();
        assert_eq!(first, json!({"id": 1, "articleId": 7, "content": "hi"}));

        let second = svc
            .create(fields(json!({"articleId": 7, "content": "again"})))
            .await
            .unwrap();
        assert_eq!(second["id"], json!(2));
        assert_eq!(svc.len(), 2);
    }

    #[tokio::test]
    async fn create_validates_fields() {
        let svc = ReactionService::new();
        let cases = [
            json!({"articleId": 0, "content": "hi"}),
            json!({"articleId": 1, "content": "x"}),
            json!({"articleId": 1, "content": "a".repeat(2049)}),
            json!({"articleId": 1, "content": "   "}),
            json!({"content": "hello"}),
            json!({"articleId": "seven", "content": "hello"}),
        ];
        for case in cases {
            let err = svc.create(fields(case.clone())).await.unwrap_err();
            assert!(matches!(err, DomainError::Invalid(_)), "{case}");
        }
        assert!(svc.is_empty());
    }

    #[tokio::test]
    async fn content_length_counts_surrounding_whitespace() {
        let svc = ReactionService::new();
        let created = svc
            .create(fields(json!({"articleId": 1, "content": " a"})))
            .await
            .unwrap();
        assert_eq!(created["content"], json!(" a"));

        let at_limit = format!(" {}", "b".repeat(2047));
        svc.create(fields(json!({"articleId": 1, "content": at_limit})))
            .await
            .unwrap();
        let over_limit = format!(" {}", "b".repeat(2048));
        let err = svc
            .create(fields(json!({"articleId": 1, "content": over_limit})))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Invalid(_)));
        assert_eq!(svc.len(), 2);
    }

    #[tokio::test]
    async fn lookup_update_delete() {
        let svc = ReactionService::new();
        svc.create(fields(json!({"articleId": 1, "content": "one"})))
            .await
            .unwrap();
        svc.create(fields(json!({"articleId": 2, "content": "two"})))
            .await
            .unwrap();

        let all = svc.lookup_all().await.unwrap();
        assert_eq!(all.as_array().unwrap().len(), 2);
        assert_eq!(all[0]["id"], json!(1));

        let updated = svc
            .update(2, fields(json!({"articleId": 3, "content": "changed"})))
            .await
            .unwrap();
        assert_eq!(updated, json!({"id": 2, "articleId": 3, "content": "changed"}));
        assert_eq!(svc.lookup_one(2).await.unwrap(), updated);

        let removed = svc.delete(1).await.unwrap();
        assert_eq!(removed["content"], json!("one"));
        assert_eq!(svc.lookup_one(1).await.unwrap_err(), DomainError::NotFound(1));
        assert_eq!(svc.delete(1).await.unwrap_err(), DomainError::NotFound(1));
    }

    #[tokio::test]
    async fn update_missing_entity_is_not_found() {
        let svc = ReactionService::new();
        let err = svc
            .update(42, fields(json!({"articleId": 1, "content": "ok"})))
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound(42));
    }
}
