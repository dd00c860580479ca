//! # Transformation engine
//!
//! Storage-agnostic core for executing declarative entity transformations:
//! DAGs of relational operators (load, filter, project, join, union,
//! materialize, sort, paginate) over schema-governed entities.
//!
//! The engine consumes two collaborator contracts, a paginated entity
//! listing and a schema-by-name lookup ([`store`]), and exposes one entry
//! point, [`transform::TransformExecutor`]. Everything else (persistence,
//! transport, auth) lives outside this crate.

pub mod entity;
pub mod filter;
pub mod memory;
pub mod schema;
pub mod store;
pub mod transform;

pub use entity::{Entity, PropertyArray, PropertyMap, PropertyValue};
pub use filter::PropertyFilter;
pub use schema::{FieldDefinition, FieldType, Schema};
pub use store::{EntityFilter, EntityPage, EntityRepository, EntitySort, SchemaProvider};
pub use transform::{
    Cancelled, ExecuteOptions, ExecutionResult, Node, NodeType, Operator, Record, Transformation,
    TransformExecutor, ValidationError,
};
