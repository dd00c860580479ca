// SPDX-FileCopyrightText: © 2026 Trellis <info@trellis.dev>

//! Contracts the transformation core consumes from the storage layer.
//!
//! The core drives storage through a single paginated listing capability plus
//! a schema-by-name lookup. Both must be safe to call from concurrent
//! executions; within one execution calls are strictly sequential.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::entity::Entity;
use crate::filter::PropertyFilter;
use crate::schema::Schema;

/// Storage-side filter for entity listing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntityFilter {
    pub entity_type: Option<String>,
    pub property_filters: Vec<PropertyFilter>,
}

/// Storage-side ordering. The transformation core always passes `None`;
/// ordering is an operator concern.
#[derive(Clone, Debug, PartialEq)]
pub struct EntitySort {
    pub field: String,
    pub ascending: bool,
}

/// One page of entities. `total_count` is the filter-matching total before
/// pagination when the backend can compute it; zero means unknown.
#[derive(Clone, Debug, Default)]
pub struct EntityPage {
    pub entities: Vec<Entity>,
    pub total_count: u64,
}

#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Lists entities of one organization. A zero `limit` means no limit; a
    /// positive `limit` returns at most that many entities starting at
    /// `offset`.
    async fn list(
        &self,
        organization_id: Uuid,
        filter: Option<&EntityFilter>,
        sort: Option<&EntitySort>,
        limit: u64,
        offset: u64,
    ) -> Result<EntityPage>;
}

#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Looks up a schema by entity type name. Returns `None` (not an error)
    /// when the organization has no schema under that name.
    async fn schema_by_name(
        &self,
        organization_id: Uuid,
        entity_type: &str,
    ) -> Result<Option<Schema>>;
}
