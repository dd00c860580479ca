// SPDX-FileCopyrightText: © 2026 Trellis <info@trellis.dev>

//! In-memory implementation of the storage contracts.
//!
//! Backs the engine tests and doubles as a reference implementation of the
//! listing semantics real backends must provide: filter first, count the
//! matching total, then window.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::entity::Entity;
use crate::filter;
use crate::schema::Schema;
use crate::store::{EntityFilter, EntityPage, EntityRepository, EntitySort, SchemaProvider};

/// One `list` invocation as observed by [`MemoryStore`].
#[derive(Clone, Debug, PartialEq)]
pub struct ListCall {
    pub entity_type: Option<String>,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    entities: Vec<Entity>,
    schemas: Vec<Schema>,
    calls: Mutex<Vec<ListCall>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(&mut self, entity: Entity) {
        self.entities.push(entity);
    }

    pub fn add_entities(&mut self, entities: impl IntoIterator<Item = Entity>) {
        self.entities.extend(entities);
    }

    pub fn add_schema(&mut self, schema: Schema) {
        self.schemas.push(schema);
    }

    /// The `list` calls issued so far, in order.
    pub fn list_calls(&self) -> Vec<ListCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl EntityRepository for MemoryStore {
    async fn list(
        &self,
        organization_id: Uuid,
        filter: Option<&EntityFilter>,
        sort: Option<&EntitySort>,
        limit: u64,
        offset: u64,
    ) -> Result<EntityPage> {
        self.calls.lock().push(ListCall {
            entity_type: filter.and_then(|f| f.entity_type.clone()),
            limit,
            offset,
        });

        let mut matching: Vec<&Entity> = self
            .entities
            .iter()
            .filter(|entity| entity.organization_id == organization_id)
            .filter(|entity| match filter {
                Some(f) => {
                    f.entity_type
                        .as_deref()
                        .map_or(true, |ty| entity.entity_type == ty)
                        && filter::matches_all(&f.property_filters, entity)
                }
                None => true,
            })
            .collect();

        if let Some(sort) = sort {
            matching.sort_by(|a, b| {
                let a = a.property(&sort.field).map(|v| v.render());
                let b = b.property(&sort.field).map(|v| v.render());
                let ord = a.cmp(&b);
                if sort.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }

        let total_count = matching.len() as u64;
        let window: Vec<Entity> = matching
            .into_iter()
            .skip(offset as usize)
            .take(if limit == 0 { usize::MAX } else { limit as usize })
            .cloned()
            .collect();

        Ok(EntityPage {
            entities: window,
            total_count,
        })
    }
}

#[async_trait]
impl SchemaProvider for MemoryStore {
    async fn schema_by_name(
        &self,
        organization_id: Uuid,
        entity_type: &str,
    ) -> Result<Option<Schema>> {
        Ok(self
            .schemas
            .iter()
            .find(|s| s.organization_id == organization_id && s.name == entity_type)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::PropertyValue;
    use crate::filter::PropertyFilter;
    use chrono::Utc;

    fn make_entity(organization_id: Uuid, entity_type: &str, name: &str) -> Entity {
        Entity {
            id: Uuid::new_v4(),
            organization_id,
            schema_id: Uuid::new_v4(),
            entity_type: entity_type.to_owned(),
            path: String::new(),
            properties: [("name".to_owned(), PropertyValue::from(name))]
                .into_iter()
                .collect(),
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_list_windows_after_filtering() {
        let org = Uuid::new_v4();
        let mut store = MemoryStore::new();
        for name in ["a", "b", "c", "d"] {
            store.add_entity(make_entity(org, "User", name));
        }
        store.add_entity(make_entity(org, "Order", "x"));
        store.add_entity(make_entity(Uuid::new_v4(), "User", "other-org"));

        let filter = EntityFilter {
            entity_type: Some("User".to_owned()),
            property_filters: vec![],
        };
        let page = store.list(org, Some(&filter), None, 2, 1).await.unwrap();
        assert_eq!(page.total_count, 4);
        let names: Vec<_> = page
            .entities
            .iter()
            .map(|e| e.property("name").unwrap().render())
            .collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_list_applies_property_filters_and_records_calls() {
        let org = Uuid::new_v4();
        let mut store = MemoryStore::new();
        store.add_entity(make_entity(org, "User", "a"));
        store.add_entity(make_entity(org, "User", "b"));

        let filter = EntityFilter {
            entity_type: Some("User".to_owned()),
            property_filters: vec![PropertyFilter::eq("name", "b")],
        };
        let page = store.list(org, Some(&filter), None, 0, 0).await.unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.entities.len(), 1);

        let calls = store.list_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].entity_type.as_deref(), Some("User"));
        assert_eq!(calls[0].limit, 0);
    }

    #[tokio::test]
    async fn test_schema_lookup_is_scoped_by_organization() {
        let org = Uuid::new_v4();
        let mut store = MemoryStore::new();
        store.add_schema(Schema {
            id: Uuid::new_v4(),
            organization_id: org,
            name: "User".to_owned(),
            version: 1,
            fields: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });

        assert!(store.schema_by_name(org, "User").await.unwrap().is_some());
        assert!(store
            .schema_by_name(Uuid::new_v4(), "User")
            .await
            .unwrap()
            .is_none());
        assert!(store.schema_by_name(org, "Order").await.unwrap().is_none());
    }
}
