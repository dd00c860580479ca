//! Property filters applied to entities, both by Load/Filter operators and by
//! storage backends.

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, PropertyValue};

/// A predicate over one property. All present clauses AND together:
/// `value` compares the property's textual form, `exists` checks presence of
/// a non-null value, `in_array` accepts any of the candidate strings (for
/// list properties, any member may match).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFilter {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_array: Option<Vec<String>>,
}

impl PropertyFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn exists(key: impl Into<String>, exists: bool) -> Self {
        Self {
            key: key.into(),
            exists: Some(exists),
            ..Self::default()
        }
    }

    pub fn any_of(key: impl Into<String>, candidates: impl IntoIterator<Item = String>) -> Self {
        Self {
            key: key.into(),
            in_array: Some(candidates.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        let value = entity.property(&self.key).filter(|v| !v.is_null());

        if let Some(required) = self.exists {
            if required != value.is_some() {
                return false;
            }
        }
        if let Some(expected) = &self.value {
            match value {
                Some(v) if v.render() == *expected => {}
                _ => return false,
            }
        }
        if let Some(candidates) = &self.in_array {
            if !candidates.is_empty() {
                match value {
                    Some(v) if value_in(v, candidates) => {}
                    _ => return false,
                }
            }
        }
        true
    }
}

fn value_in(value: &PropertyValue, candidates: &[String]) -> bool {
    match value {
        PropertyValue::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .any(|item| candidates.iter().any(|c| item.render() == *c)),
        other => candidates.iter().any(|c| other.render() == *c),
    }
}

pub fn matches_all(filters: &[PropertyFilter], entity: &Entity) -> bool {
    filters.iter().all(|f| f.matches(entity))
}
