//! Keyed record store backing the materialized read model.
//!
//! The sync pipeline talks to a generic `EntityStore` capability rather
//! than a relational API, so the applier stays testable against an
//! in-memory implementation and the Postgres binding stays swappable.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::Result;

pub use memory::MemoryEntityStore;
pub use pg::PgEntityStore;

/// Target entity kinds materialized by the sync pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Brand,
    Store,
    Schedule,
    Category,
    SubCategory,
    Unit,
    Product,
    ProductImage,
    ProductVariant,
    Inventory,
}

impl EntityKind {
    pub const ALL: [EntityKind; 10] = [
        EntityKind::Brand,
        EntityKind::Store,
        EntityKind::Schedule,
        EntityKind::Category,
        EntityKind::SubCategory,
        EntityKind::Unit,
        EntityKind::Product,
        EntityKind::ProductImage,
        EntityKind::ProductVariant,
        EntityKind::Inventory,
    ];

    /// Read-model table backing this kind.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Brand => "brands",
            EntityKind::Store => "stores",
            EntityKind::Schedule => "schedules",
            EntityKind::Category => "categories",
            EntityKind::SubCategory => "sub_categories",
            EntityKind::Unit => "units",
            EntityKind::Product => "products",
            EntityKind::ProductImage => "product_images",
            EntityKind::ProductVariant => "product_variants",
            EntityKind::Inventory => "inventory",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Brand => "Brand",
            EntityKind::Store => "Store",
            EntityKind::Schedule => "Schedule",
            EntityKind::Category => "Category",
            EntityKind::SubCategory => "SubCategory",
            EntityKind::Unit => "Unit",
            EntityKind::Product => "Product",
            EntityKind::ProductImage => "ProductImage",
            EntityKind::ProductVariant => "ProductVariant",
            EntityKind::Inventory => "Inventory",
        };
        write!(f, "{name}")
    }
}

/// Keyed record store consumed by the sync applier.
///
/// Entities populated through this interface have no other writer; the
/// applier relies on that for idempotent reapplication.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Create-or-update the record keyed by `id`, as a single atomic
    /// statement. All supplied attributes overwrite the stored ones.
    async fn upsert(&self, kind: EntityKind, id: &str, attributes: &Map<String, Value>)
        -> Result<()>;

    /// Delete the record keyed by `id`. Returns whether a record existed;
    /// deleting an absent record is not an error.
    async fn delete_by_id(&self, kind: EntityKind, id: &str) -> Result<bool>;

    /// Fetch the stored attribute document for `id`, if any.
    async fn find_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<Value>>;

    /// Housekeeping hook: recycle stale connections under long-lived
    /// streaming load. No correctness impact.
    async fn recycle(&self) -> Result<()> {
        Ok(())
    }
}
