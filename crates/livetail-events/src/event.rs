//! The event payload fanned out to streaming clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A domain event.
///
/// `id == 0` marks an event that has not been saved yet; the store assigns
/// ids and timestamps on first save.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    /// Store-assigned id.
    pub id: i64,
    /// Dotted event key, e.g. `myapp.user.login`.
    pub key: String,
    /// Values interpolated into the key's human-readable form.
    pub key_params: Map<String, Value>,
    /// When the event was first stored.
    pub created: DateTime<Utc>,
    /// When the event was last stored.
    pub updated: DateTime<Utc>,
    /// Arbitrary application payload.
    pub payload: Value,
    /// Human-readable description.
    pub description: String,
    /// Importance level; higher is more important.
    pub importance: i32,
    /// Originating application.
    pub origin: String,
    /// Entities the event is about (`type/id`).
    pub entities: Vec<String>,
    /// Other references (URLs, external ids).
    pub other_references: Vec<String>,
    /// Actors that caused the event.
    pub actors: Vec<String>,
    /// Free-form tags.
    pub tags: Vec<String>,
}

impl Default for Event {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            key: String::new(),
            key_params: Map::new(),
            created: now,
            updated: now,
            payload: Value::Null,
            description: String::new(),
            importance: 0,
            origin: String::new(),
            entities: Vec::new(),
            other_references: Vec::new(),
            actors: Vec::new(),
            tags: Vec::new(),
        }
    }
}

impl Event {
    /// Create an unsaved event.
    pub fn new(
        key: impl Into<String>,
        description: impl Into<String>,
        importance: i32,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            importance,
            origin: origin.into(),
            ..Self::default()
        }
    }

    /// Set the entity references.
    #[must_use]
    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = entities.into_iter().map(Into::into).collect();
        self
    }

    /// Set the other references.
    #[must_use]
    pub fn with_other_references<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.other_references = refs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the actors.
    #[must_use]
    pub fn with_actors<I, S>(mut self, actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actors = actors.into_iter().map(Into::into).collect();
        self
    }

    /// Set the tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Whether the event has been assigned an id by a store.
    pub fn is_saved(&self) -> bool {
        self.id != 0
    }
}
