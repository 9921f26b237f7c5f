//! Event filters and the matching predicate.
//!
//! A [`Query`] is both the REST search description and the subscription
//! filter a streaming client installs. Every unset field leaves the event
//! unconstrained, so `Query::default()` matches everything.
//!
//! Match rules:
//! - `key`: exact, or prefix match when the filter ends in `*`
//! - `origin`: exact
//! - `entities`, `other_references`, `actors`, `tags`: every filter value must
//!   be present on the event
//! - `importance`: comparison against the event importance
//! - `from` / `to`: inclusive bounds on `created`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{EventStoreError, Result};
use crate::event::Event;

/// Comparison operator for [`ImportanceFilter`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// Equal.
    #[default]
    Eq,
    /// Strictly greater.
    Gt,
    /// Greater or equal.
    Gte,
    /// Strictly less.
    Lt,
    /// Less or equal.
    Lte,
}

impl Comparison {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Self::Eq),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            _ => None,
        }
    }
}

/// Constraint on [`Event::importance`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportanceFilter {
    /// How to compare.
    #[serde(default)]
    pub comparison: Comparison,
    /// Value compared against.
    pub value: i32,
}

impl ImportanceFilter {
    /// Whether `importance` satisfies the constraint.
    pub fn accepts(&self, importance: i32) -> bool {
        match self.comparison {
            Comparison::Eq => importance == self.value,
            Comparison::Gt => importance > self.value,
            Comparison::Gte => importance >= self.value,
            Comparison::Lt => importance < self.value,
            Comparison::Lte => importance <= self.value,
        }
    }

    /// Parse `gte:3` or a bare `3` (equality).
    fn parse(raw: &str) -> Result<Self> {
        let (comparison, value) = match raw.split_once(':') {
            Some((op, value)) => {
                let comparison = Comparison::parse(op).ok_or_else(|| {
                    EventStoreError::invalid_query("importance", format!("unknown comparison `{op}`"))
                })?;
                (comparison, value)
            }
            None => (Comparison::Eq, raw),
        };
        let value = value.trim().parse::<i32>().map_err(|e| {
            EventStoreError::invalid_query("importance", e.to_string())
        })?;
        Ok(Self { comparison, value })
    }
}

/// A filter over event attributes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    /// Event key, `*`-suffixed for prefix matching.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key: String,
    /// Originating application.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub origin: String,
    /// Required entity references.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
    /// Required other references.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub other_references: Vec<String>,
    /// Required actors.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actors: Vec<String>,
    /// Required tags.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Importance constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<ImportanceFilter>,
    /// Lower bound on `created`, inclusive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    /// Upper bound on `created`, inclusive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
}

impl Query {
    /// Filter on a set of entities.
    pub fn entities<I, S>(entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entities: entities.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Whether no field constrains the match.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Build a query from URL query pairs.
    ///
    /// List fields accept repeated keys (`entities=a&entities=b`). Unknown
    /// keys are ignored so callers can mix in unrelated parameters.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut query = Self::default();
        for (k, v) in pairs {
            let value = v.as_ref();
            match k.as_ref() {
                "key" => value.clone_into(&mut query.key),
                "origin" => value.clone_into(&mut query.origin),
                "entities" => query.entities.push(value.to_owned()),
                "other_references" => query.other_references.push(value.to_owned()),
                "actors" => query.actors.push(value.to_owned()),
                "tags" => query.tags.push(value.to_owned()),
                "importance" => query.importance = Some(ImportanceFilter::parse(value)?),
                "from" => query.from = Some(parse_timestamp("from", value)?),
                "to" => query.to = Some(parse_timestamp("to", value)?),
                _ => {}
            }
        }
        Ok(query)
    }

    /// Evaluate the filter against an event.
    pub fn matches(&self, event: &Event) -> bool {
        key_matches(&self.key, &event.key)
            && (self.origin.is_empty() || self.origin == event.origin)
            && contains_all(&event.entities, &self.entities)
            && contains_all(&event.other_references, &self.other_references)
            && contains_all(&event.actors, &self.actors)
            && contains_all(&event.tags, &self.tags)
            && self.importance.is_none_or(|f| f.accepts(event.importance))
            && self.from.is_none_or(|from| event.created >= from)
            && self.to.is_none_or(|to| event.created <= to)
    }
}

/// Pure predicate used by the broadcast hub: does `filter` select `event`?
pub fn matches(filter: &Query, event: &Event) -> bool {
    filter.matches(event)
}

fn key_matches(pattern: &str, key: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

fn contains_all(haystack: &[String], required: &[String]) -> bool {
    required.iter().all(|r| haystack.contains(r))
}

fn parse_timestamp(param: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| EventStoreError::invalid_query(param, e.to_string()))
}
