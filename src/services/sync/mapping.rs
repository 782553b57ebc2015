//! Static transformation rules: which source table feeds which entity
//! kind, and how its columns are renamed and decoded on the way in.
//!
//! The registry is resolved once at startup; the per-message path only
//! does map lookups.

use std::collections::{HashMap, HashSet};

use crate::db::EntityKind;

/// Audit columns dropped from every row image before mapping; the read
/// model tracks its own sync timestamps.
const IGNORED_FIELDS: [&str; 2] = ["created_at", "updated_at"];

/// Transformation rules for one source table.
#[derive(Debug, Clone)]
pub struct EntityMapping {
    pub kind: EntityKind,
    /// Source column to target attribute. Columns not listed keep their name.
    renames: HashMap<&'static str, &'static str>,
    /// Columns carrying fixed-point cent values as base64 big-endian bytes.
    cents_fields: HashSet<&'static str>,
    /// Columns carrying microsecond counts rendered as `HH:MM:SS`.
    duration_fields: HashSet<&'static str>,
}

impl EntityMapping {
    fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            renames: HashMap::new(),
            cents_fields: HashSet::new(),
            duration_fields: HashSet::new(),
        }
    }

    fn rename(mut self, source: &'static str, target: &'static str) -> Self {
        self.renames.insert(source, target);
        self
    }

    fn cents(mut self, fields: &[&'static str]) -> Self {
        self.cents_fields.extend(fields);
        self
    }

    fn durations(mut self, fields: &[&'static str]) -> Self {
        self.duration_fields.extend(fields);
        self
    }

    /// Target attribute name for a source column.
    pub fn target_field<'a>(&'a self, source: &'a str) -> &'a str {
        self.renames.get(source).copied().unwrap_or(source)
    }

    pub fn cents_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.cents_fields.iter().copied()
    }

    pub fn duration_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.duration_fields.iter().copied()
    }
}

/// All mappings known to this consumer, keyed by source table name
/// (case-sensitive).
#[derive(Debug)]
pub struct MappingRegistry {
    by_table: HashMap<&'static str, EntityMapping>,
}

impl MappingRegistry {
    /// The catalog read-model mapping set.
    pub fn catalog() -> Self {
        let mappings = [
            ("Brands", EntityMapping::new(EntityKind::Brand)),
            (
                "Stores",
                EntityMapping::new(EntityKind::Store)
                    .rename("brand", "brand_id")
                    .cents(&["latitude", "longitude", "delivery_radius_km"]),
            ),
            (
                "schedules",
                EntityMapping::new(EntityKind::Schedule)
                    .durations(&["open_time", "close_time"]),
            ),
            ("Categories", EntityMapping::new(EntityKind::Category)),
            ("SubCategories", EntityMapping::new(EntityKind::SubCategory)),
            ("Units", EntityMapping::new(EntityKind::Unit)),
            ("Products", EntityMapping::new(EntityKind::Product)),
            ("Product_images", EntityMapping::new(EntityKind::ProductImage)),
            (
                "Product_variants",
                EntityMapping::new(EntityKind::ProductVariant)
                    .cents(&["height", "width", "depth", "price"]),
            ),
            ("Inventory", EntityMapping::new(EntityKind::Inventory)),
        ];

        Self {
            by_table: mappings.into_iter().collect(),
        }
    }

    pub fn get(&self, table: &str) -> Option<&EntityMapping> {
        self.by_table.get(table)
    }

    /// Whether a source column is dropped before mapping.
    pub fn is_ignored(field: &str) -> bool {
        IGNORED_FIELDS.contains(&field)
    }
}
