//! Exercise catalog and tag-selector resolution.
//!
//! The catalog is fetched once per invocation and indexed by muscle group,
//! target muscle, equipment and movement type. A tag selector resolves to
//! the intersection of the per-field matches.

use crate::types::Selector;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// One exercise as described by the external catalog
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub muscle_groups: Vec<String>,
    #[serde(default)]
    pub target_muscles: Vec<String>,
    #[serde(default)]
    pub equipment: Vec<String>,
    #[serde(default)]
    pub movement_type: Option<String>,
}

/// Catalog fields a tag selector may filter on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum TagField {
    MuscleGroup,
    TargetMuscle,
    Equipment,
    MovementType,
}

impl TagField {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "muscle_group" | "muscle_groups" => Some(TagField::MuscleGroup),
            "target_muscle" | "target_muscles" => Some(TagField::TargetMuscle),
            "equipment" => Some(TagField::Equipment),
            "movement_type" | "movement_types" => Some(TagField::MovementType),
            _ => None,
        }
    }
}

/// Per-field indices over the catalog, built once per invocation
#[derive(Clone, Debug, Default)]
pub struct CatalogIndex {
    entries: HashMap<i64, CatalogEntry>,
    by_field: HashMap<TagField, HashMap<String, BTreeSet<i64>>>,
}

fn normalize(tag: &str) -> String {
    tag.trim().to_lowercase()
}

impl CatalogIndex {
    pub fn build(entries: Vec<CatalogEntry>) -> Self {
        let mut index = CatalogIndex::default();

        for entry in entries {
            let tagged: [(TagField, Vec<&String>); 4] = [
                (TagField::MuscleGroup, entry.muscle_groups.iter().collect()),
                (TagField::TargetMuscle, entry.target_muscles.iter().collect()),
                (TagField::Equipment, entry.equipment.iter().collect()),
                (TagField::MovementType, entry.movement_type.iter().collect()),
            ];
            for (field, tags) in tagged {
                let field_index = index.by_field.entry(field).or_default();
                for tag in tags {
                    field_index
                        .entry(normalize(tag))
                        .or_default()
                        .insert(entry.id);
                }
            }
            index.entries.insert(entry.id, entry);
        }

        tracing::debug!("Indexed {} catalog entries", index.entries.len());
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a selector into exercise ids
    ///
    /// Returns an empty set when the selector cannot be resolved: wrong
    /// type, non-object value, no filters, or an unknown filter key.
    pub fn resolve(&self, selector: &Selector) -> BTreeSet<i64> {
        if selector.kind != "tags" {
            tracing::warn!("Unsupported selector type '{}'", selector.kind);
            return BTreeSet::new();
        }

        let Some(filters) = parse_filters(&selector.value) else {
            tracing::warn!("Unresolvable tag selector: {}", selector.value);
            return BTreeSet::new();
        };

        let mut result: Option<BTreeSet<i64>> = None;
        for (field, wanted) in filters {
            let field_index = self.by_field.get(&field);
            let matches: BTreeSet<i64> = wanted
                .iter()
                .filter_map(|tag| field_index.and_then(|idx| idx.get(tag)))
                .flatten()
                .copied()
                .collect();

            result = Some(match result {
                None => matches,
                Some(acc) => acc.intersection(&matches).copied().collect(),
            });
        }

        result.unwrap_or_default()
    }

    /// Validate the catalog for consistency
    ///
    /// Returns a list of validation errors, or empty Vec if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (id, entry) in &self.entries {
            if entry.name.trim().is_empty() {
                errors.push(format!("Exercise {} has empty name", id));
            }
            if entry.muscle_groups.is_empty()
                && entry.target_muscles.is_empty()
                && entry.equipment.is_empty()
                && entry.movement_type.is_none()
            {
                errors.push(format!(
                    "Exercise {} ('{}') has no tags and can never match a selector",
                    id, entry.name
                ));
            }
        }

        errors.sort();
        errors
    }
}

/// Parse `{"muscle_group": "chest", "equipment": ["barbell", "dumbbell"]}`
fn parse_filters(value: &Value) -> Option<Vec<(TagField, Vec<String>)>> {
    let object = value.as_object()?;
    if object.is_empty() {
        return None;
    }

    let mut filters = Vec::with_capacity(object.len());
    for (key, raw) in object {
        let field = TagField::from_key(key)?;
        let tags: Vec<String> = match raw {
            Value::String(tag) => vec![normalize(tag)],
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(normalize))
                .collect::<Option<Vec<_>>>()?,
            _ => return None,
        };
        if tags.is_empty() {
            return None;
        }
        filters.push((field, tags));
    }
    Some(filters)
}
