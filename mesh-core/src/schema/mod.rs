//! The field model backing resource schemas and endpoint payloads.

mod field;

pub use field::{Field, FieldKind, Phase};

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::SpecificationError;

/// A named mapping from attribute name to [`Field`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: BTreeMap<String, Field>,
}

impl Schema {
    pub fn new() -> Schema {
        Schema::default()
    }

    /// Install a field under a name; the field's own name is aligned.
    pub fn insert(&mut self, name: impl Into<String>, field: Field) {
        let name = name.into();
        let field = field.with_name(name.clone());
        self.fields.insert(name, field);
    }

    pub fn remove(&mut self, name: &str) -> Option<Field> {
        self.fields.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Field)> {
        self.fields.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Merge another schema's fields over this one.
    pub fn merge(&mut self, other: &Schema) {
        for (name, field) in other.iter() {
            self.fields.insert(name.clone(), field.clone());
        }
    }

    /// The subset of fields matching a predicate.
    pub fn filter(&self, predicate: impl Fn(&Field) -> bool) -> Schema {
        Schema {
            fields: self
                .fields
                .iter()
                .filter(|(_, field)| predicate(field))
                .map(|(name, field)| (name.clone(), field.clone()))
                .collect(),
        }
    }

    /// Clone the schema, excluding the named attributes.
    pub fn mirror(&self, exclude: &[&str]) -> Schema {
        self.filter(|field| {
            field
                .name
                .as_deref()
                .map(|name| !exclude.contains(&name))
                .unwrap_or(true)
        })
    }

    /// Package this schema as a structure field.
    pub fn to_structure(&self, name: Option<&str>) -> Field {
        let mut field = Field::structure(self.fields.clone());
        if let Some(name) = name {
            field = field.with_name(name);
        }
        field
    }

    pub fn describe(&self, verbose: bool) -> Value {
        let mut map = Map::new();
        for (name, field) in &self.fields {
            map.insert(name.clone(), field.describe(verbose));
        }
        Value::Object(map)
    }

    pub fn reconstruct(description: &Value) -> Result<Schema, SpecificationError> {
        let members = description
            .as_object()
            .ok_or_else(|| SpecificationError::new("schema description must be an object"))?;

        let mut schema = Schema::new();
        for (name, field) in members {
            schema.insert(name.clone(), Field::reconstruct(field)?);
        }
        Ok(schema)
    }
}

impl FromIterator<(String, Field)> for Schema {
    fn from_iter<T: IntoIterator<Item = (String, Field)>>(iter: T) -> Schema {
        let mut schema = Schema::new();
        for (name, field) in iter {
            schema.insert(name, field);
        }
        schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_aligns_field_name() {
        let mut schema = Schema::new();
        schema.insert("attr", Field::text());
        assert_eq!(schema.get("attr").unwrap().name.as_deref(), Some("attr"));
    }

    #[test]
    fn filter_and_mirror() {
        let mut schema = Schema::new();
        schema.insert("attr", Field::text());
        schema.insert("locked", Field::text().readonly(true));

        let writable = schema.filter(|field| !field.readonly);
        assert!(writable.contains("attr"));
        assert!(!writable.contains("locked"));

        let mirrored = schema.mirror(&["attr"]);
        assert!(!mirrored.contains("attr"));
        assert!(mirrored.contains("locked"));
    }

    #[test]
    fn round_trip() {
        let mut schema = Schema::new();
        schema.insert("id", Field::integer().nonnull(true).identifier(true));
        schema.insert("attr", Field::text().sortable(true));

        let reconstructed = Schema::reconstruct(&schema.describe(false)).unwrap();
        assert_eq!(reconstructed, schema);
    }
}
