use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use crate::error::{ErrorDetail, SpecificationError, StructuralError};

/// The direction a value is flowing through a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Inbound,
    Outbound,
}

/// The type of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Accepts any value; used for opaque payloads and omitted fields.
    Any,
    Boolean,
    Integer {
        minimum: Option<i64>,
        maximum: Option<i64>,
    },
    Float,
    Text,
    Enumeration {
        values: Vec<String>,
    },
    Sequence {
        item: Box<Field>,
        unique: bool,
    },
    Structure {
        fields: BTreeMap<String, Field>,
    },
    Map {
        value: Box<Field>,
    },
}

impl FieldKind {
    fn token(&self) -> &'static str {
        match self {
            FieldKind::Any => "field",
            FieldKind::Boolean => "boolean",
            FieldKind::Integer { .. } => "integer",
            FieldKind::Float => "float",
            FieldKind::Text => "text",
            FieldKind::Enumeration { .. } => "enumeration",
            FieldKind::Sequence { .. } => "sequence",
            FieldKind::Structure { .. } => "structure",
            FieldKind::Map { .. } => "map",
        }
    }
}

/// A typed field descriptor.
///
/// Fields are immutable once installed in a schema; the consuming builder
/// methods produce modified copies.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: Option<String>,
    pub kind: FieldKind,
    pub required: bool,
    pub nonnull: bool,
    pub readonly: bool,
    pub deferred: bool,
    pub sortable: bool,
    pub is_identifier: bool,
    pub ignore_null: bool,
    pub oncreate: Option<bool>,
    pub onupdate: Option<bool>,
    pub onput: Option<bool>,
    pub returned: Vec<String>,
    pub operators: Vec<String>,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl Field {
    fn of(kind: FieldKind) -> Field {
        Field {
            name: None,
            kind,
            required: false,
            nonnull: false,
            readonly: false,
            deferred: false,
            sortable: false,
            is_identifier: false,
            ignore_null: false,
            oncreate: None,
            onupdate: None,
            onput: None,
            returned: Vec::new(),
            operators: Vec::new(),
            default: None,
            description: None,
        }
    }

    pub fn any() -> Field {
        Field::of(FieldKind::Any)
    }

    pub fn boolean() -> Field {
        Field::of(FieldKind::Boolean)
    }

    pub fn integer() -> Field {
        Field::of(FieldKind::Integer {
            minimum: None,
            maximum: None,
        })
    }

    pub fn float() -> Field {
        Field::of(FieldKind::Float)
    }

    pub fn text() -> Field {
        Field::of(FieldKind::Text)
    }

    pub fn enumeration<I, S>(values: I) -> Field
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Field::of(FieldKind::Enumeration {
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn sequence(item: Field) -> Field {
        Field::of(FieldKind::Sequence {
            item: Box::new(item),
            unique: false,
        })
    }

    pub fn structure(fields: BTreeMap<String, Field>) -> Field {
        Field::of(FieldKind::Structure { fields })
    }

    pub fn map(value: Field) -> Field {
        Field::of(FieldKind::Map {
            value: Box::new(value),
        })
    }

    // ── Consuming builder methods ───────────────────────────────────────

    pub fn with_name(mut self, name: impl Into<String>) -> Field {
        self.name = Some(name.into());
        self
    }

    pub fn required(mut self, required: bool) -> Field {
        self.required = required;
        self
    }

    pub fn nonnull(mut self, nonnull: bool) -> Field {
        self.nonnull = nonnull;
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Field {
        self.readonly = readonly;
        self
    }

    pub fn deferred(mut self, deferred: bool) -> Field {
        self.deferred = deferred;
        self
    }

    pub fn sortable(mut self, sortable: bool) -> Field {
        self.sortable = sortable;
        self
    }

    pub fn identifier(mut self, is_identifier: bool) -> Field {
        self.is_identifier = is_identifier;
        self
    }

    pub fn ignore_null(mut self, ignore_null: bool) -> Field {
        self.ignore_null = ignore_null;
        self
    }

    pub fn oncreate(mut self, oncreate: bool) -> Field {
        self.oncreate = Some(oncreate);
        self
    }

    pub fn onupdate(mut self, onupdate: bool) -> Field {
        self.onupdate = Some(onupdate);
        self
    }

    pub fn onput(mut self, onput: bool) -> Field {
        self.onput = Some(onput);
        self
    }

    pub fn returned<I, S>(mut self, endpoints: I) -> Field
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returned = endpoints.into_iter().map(Into::into).collect();
        self
    }

    pub fn operators<I, S>(mut self, operators: I) -> Field
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operators = operators.into_iter().map(Into::into).collect();
        self
    }

    pub fn minimum(mut self, value: i64) -> Field {
        if let FieldKind::Integer { minimum, .. } = &mut self.kind {
            *minimum = Some(value);
        }
        self
    }

    pub fn maximum(mut self, value: i64) -> Field {
        if let FieldKind::Integer { maximum, .. } = &mut self.kind {
            *maximum = Some(value);
        }
        self
    }

    pub fn unique(mut self, unique: bool) -> Field {
        if let FieldKind::Sequence { unique: flag, .. } = &mut self.kind {
            *flag = unique;
        }
        self
    }

    pub fn default_value(mut self, value: Value) -> Field {
        self.default = Some(value);
        self
    }

    pub fn describe_as(mut self, description: impl Into<String>) -> Field {
        self.description = Some(description.into());
        self
    }

    /// The structure members of a structure field.
    pub fn structure_fields(&self) -> Option<&BTreeMap<String, Field>> {
        match &self.kind {
            FieldKind::Structure { fields } => Some(fields),
            _ => None,
        }
    }

    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("value")
    }

    // ── Processing ──────────────────────────────────────────────────────

    /// Validate a value against this field, returning the processed value.
    ///
    /// When `serialized` is set, scalar values arriving as strings (as from
    /// a URL-encoded payload) are coerced to the field's type.
    pub fn process(
        &self,
        value: &Value,
        phase: Phase,
        serialized: bool,
    ) -> Result<Value, StructuralError> {
        if value.is_null() {
            if self.nonnull && !self.ignore_null {
                return Err(StructuralError::with_message(
                    "nonnull",
                    format!("{} must not be null", self.display_name()),
                ));
            }
            return Ok(Value::Null);
        }

        match &self.kind {
            FieldKind::Any => Ok(value.clone()),
            FieldKind::Boolean => self.process_boolean(value, serialized),
            FieldKind::Integer { minimum, maximum } => {
                self.process_integer(value, serialized, *minimum, *maximum)
            }
            FieldKind::Float => self.process_float(value, serialized),
            FieldKind::Text => self.process_text(value, serialized),
            FieldKind::Enumeration { values } => self.process_enumeration(value, values),
            FieldKind::Sequence { item, unique } => {
                self.process_sequence(value, phase, serialized, item, *unique)
            }
            FieldKind::Structure { fields } => {
                self.process_structure(value, phase, serialized, fields)
            }
            FieldKind::Map { value: item } => self.process_map(value, phase, serialized, item),
        }
    }

    fn invalid(&self, expected: &str) -> StructuralError {
        StructuralError::with_message(
            "invalid",
            format!("{} must be {expected}", self.display_name()),
        )
    }

    fn process_boolean(&self, value: &Value, serialized: bool) -> Result<Value, StructuralError> {
        match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(text) if serialized => match text.as_str() {
                "true" | "True" | "1" => Ok(Value::Bool(true)),
                "false" | "False" | "0" => Ok(Value::Bool(false)),
                _ => Err(self.invalid("a boolean")),
            },
            _ => Err(self.invalid("a boolean")),
        }
    }

    fn process_integer(
        &self,
        value: &Value,
        serialized: bool,
        minimum: Option<i64>,
        maximum: Option<i64>,
    ) -> Result<Value, StructuralError> {
        let candidate = match value {
            Value::Number(number) if number.is_i64() || number.is_u64() => number
                .as_i64()
                .ok_or_else(|| self.invalid("an integer"))?,
            Value::String(text) if serialized => {
                text.parse::<i64>().map_err(|_| self.invalid("an integer"))?
            }
            _ => return Err(self.invalid("an integer")),
        };

        if let Some(minimum) = minimum {
            if candidate < minimum {
                return Err(StructuralError {
                    errors: vec![ErrorDetail {
                        token: "minimum".into(),
                        title: Some("minimum value".into()),
                        message: Some(format!(
                            "{} must be greater than or equal to {minimum}",
                            self.display_name()
                        )),
                    }],
                    structure: BTreeMap::new(),
                });
            }
        }
        if let Some(maximum) = maximum {
            if candidate > maximum {
                return Err(StructuralError {
                    errors: vec![ErrorDetail {
                        token: "maximum".into(),
                        title: Some("maximum value".into()),
                        message: Some(format!(
                            "{} must be less than or equal to {maximum}",
                            self.display_name()
                        )),
                    }],
                    structure: BTreeMap::new(),
                });
            }
        }
        Ok(Value::Number(Number::from(candidate)))
    }

    fn process_float(&self, value: &Value, serialized: bool) -> Result<Value, StructuralError> {
        match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(text) if serialized => {
                let parsed = text.parse::<f64>().map_err(|_| self.invalid("a number"))?;
                Number::from_f64(parsed)
                    .map(Value::Number)
                    .ok_or_else(|| self.invalid("a number"))
            }
            _ => Err(self.invalid("a number")),
        }
    }

    fn process_text(&self, value: &Value, serialized: bool) -> Result<Value, StructuralError> {
        match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(number) if serialized => Ok(Value::String(number.to_string())),
            Value::Bool(flag) if serialized => Ok(Value::String(flag.to_string())),
            _ => Err(self.invalid("a string")),
        }
    }

    fn process_enumeration(
        &self,
        value: &Value,
        values: &[String],
    ) -> Result<Value, StructuralError> {
        match value {
            Value::String(text) if values.iter().any(|v| v == text) => Ok(value.clone()),
            _ => Err(StructuralError::with_message(
                "invalid",
                format!(
                    "{} must be one of: {}",
                    self.display_name(),
                    values.join(", ")
                ),
            )),
        }
    }

    fn process_sequence(
        &self,
        value: &Value,
        phase: Phase,
        serialized: bool,
        item: &Field,
        unique: bool,
    ) -> Result<Value, StructuralError> {
        let items = match value {
            Value::Array(items) => items,
            _ => return Err(self.invalid("a sequence")),
        };

        let mut error = StructuralError::empty();
        let mut processed = Vec::with_capacity(items.len());
        for (index, candidate) in items.iter().enumerate() {
            match item.process(candidate, phase, serialized) {
                Ok(value) => processed.push(value),
                Err(item_error) => error.attach(index.to_string(), item_error),
            }
        }

        if unique {
            for (index, candidate) in processed.iter().enumerate() {
                if processed[..index].contains(candidate) {
                    error.merge(StructuralError::with_message(
                        "duplicate",
                        format!("{} must not contain duplicates", self.display_name()),
                    ));
                    break;
                }
            }
        }

        if error.substantive() {
            Err(error)
        } else {
            Ok(Value::Array(processed))
        }
    }

    fn process_structure(
        &self,
        value: &Value,
        phase: Phase,
        serialized: bool,
        fields: &BTreeMap<String, Field>,
    ) -> Result<Value, StructuralError> {
        let members = match value {
            Value::Object(members) => members,
            _ => return Err(self.invalid("a structure")),
        };

        let mut error = StructuralError::empty();
        for key in members.keys() {
            if !fields.contains_key(key) {
                error.attach(
                    key.clone(),
                    StructuralError::with_message("unknown", format!("{key} is not recognized")),
                );
            }
        }

        let mut processed = Map::new();
        for (name, field) in fields {
            match members.get(name) {
                Some(candidate) => match field.process(candidate, phase, serialized) {
                    Ok(value) => {
                        if !(value.is_null() && field.ignore_null) {
                            processed.insert(name.clone(), value);
                        }
                    }
                    Err(field_error) => error.attach(name.clone(), field_error),
                },
                None => {
                    if let (Phase::Inbound, Some(default)) = (phase, &field.default) {
                        processed.insert(name.clone(), default.clone());
                    } else if field.required {
                        error.attach(
                            name.clone(),
                            StructuralError::with_message(
                                "required",
                                format!("{name} is required"),
                            ),
                        );
                    }
                }
            }
        }

        if error.substantive() {
            Err(error)
        } else {
            Ok(Value::Object(processed))
        }
    }

    fn process_map(
        &self,
        value: &Value,
        phase: Phase,
        serialized: bool,
        item: &Field,
    ) -> Result<Value, StructuralError> {
        let members = match value {
            Value::Object(members) => members,
            _ => return Err(self.invalid("a map")),
        };

        let mut error = StructuralError::empty();
        let mut processed = Map::new();
        for (key, candidate) in members {
            match item.process(candidate, phase, serialized) {
                Ok(value) => {
                    processed.insert(key.clone(), value);
                }
                Err(member_error) => error.attach(key.clone(), member_error),
            }
        }

        if error.substantive() {
            Err(error)
        } else {
            Ok(Value::Object(processed))
        }
    }

    // ── Description ─────────────────────────────────────────────────────

    /// Emit a serializable description of this field. Attributes holding
    /// their default value are omitted unless `verbose` is set.
    pub fn describe(&self, verbose: bool) -> Value {
        let mut map = Map::new();
        map.insert("fieldtype".into(), Value::String(self.kind.token().into()));

        if let Some(name) = &self.name {
            map.insert("name".into(), Value::String(name.clone()));
        }

        let mut flag = |key: &str, value: bool| {
            if value || verbose {
                map.insert(key.into(), Value::Bool(value));
            }
        };
        flag("required", self.required);
        flag("nonnull", self.nonnull);
        flag("readonly", self.readonly);
        flag("deferred", self.deferred);
        flag("sortable", self.sortable);
        flag("is_identifier", self.is_identifier);
        flag("ignore_null", self.ignore_null);

        for (key, value) in [
            ("oncreate", self.oncreate),
            ("onupdate", self.onupdate),
            ("onput", self.onput),
        ] {
            if let Some(value) = value {
                map.insert(key.into(), Value::Bool(value));
            } else if verbose {
                map.insert(key.into(), Value::Null);
            }
        }

        if !self.returned.is_empty() || verbose {
            map.insert(
                "returned".into(),
                Value::Array(self.returned.iter().cloned().map(Value::String).collect()),
            );
        }
        if !self.operators.is_empty() || verbose {
            map.insert(
                "operators".into(),
                Value::Array(self.operators.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(default) = &self.default {
            map.insert("default".into(), default.clone());
        }
        if let Some(description) = &self.description {
            map.insert("description".into(), Value::String(description.clone()));
        } else if verbose {
            map.insert("description".into(), Value::Null);
        }

        match &self.kind {
            FieldKind::Integer { minimum, maximum } => {
                if let Some(minimum) = minimum {
                    map.insert("minimum".into(), Value::Number((*minimum).into()));
                }
                if let Some(maximum) = maximum {
                    map.insert("maximum".into(), Value::Number((*maximum).into()));
                }
            }
            FieldKind::Enumeration { values } => {
                map.insert(
                    "enumeration".into(),
                    Value::Array(values.iter().cloned().map(Value::String).collect()),
                );
            }
            FieldKind::Sequence { item, unique } => {
                map.insert("item".into(), item.describe(verbose));
                if *unique || verbose {
                    map.insert("unique".into(), Value::Bool(*unique));
                }
            }
            FieldKind::Structure { fields } => {
                let mut structure = Map::new();
                for (name, field) in fields {
                    structure.insert(name.clone(), field.describe(verbose));
                }
                map.insert("structure".into(), Value::Object(structure));
            }
            FieldKind::Map { value } => {
                map.insert("value".into(), value.describe(verbose));
            }
            _ => {}
        }

        Value::Object(map)
    }

    /// Rebuild a field from its description. Inverse of [`Field::describe`].
    pub fn reconstruct(description: &Value) -> Result<Field, SpecificationError> {
        let map = description
            .as_object()
            .ok_or_else(|| SpecificationError::new("field description must be an object"))?;

        let fieldtype = map
            .get("fieldtype")
            .and_then(Value::as_str)
            .ok_or_else(|| SpecificationError::new("field description lacks a fieldtype"))?;

        let kind = match fieldtype {
            "field" => FieldKind::Any,
            "boolean" => FieldKind::Boolean,
            "integer" => FieldKind::Integer {
                minimum: map.get("minimum").and_then(Value::as_i64),
                maximum: map.get("maximum").and_then(Value::as_i64),
            },
            "float" => FieldKind::Float,
            "text" => FieldKind::Text,
            "enumeration" => FieldKind::Enumeration {
                values: string_list(map.get("enumeration")),
            },
            "sequence" => {
                let item = map
                    .get("item")
                    .ok_or_else(|| SpecificationError::new("sequence description lacks an item"))?;
                FieldKind::Sequence {
                    item: Box::new(Field::reconstruct(item)?),
                    unique: map.get("unique").and_then(Value::as_bool).unwrap_or(false),
                }
            }
            "structure" => {
                let members = map
                    .get("structure")
                    .and_then(Value::as_object)
                    .ok_or_else(|| {
                        SpecificationError::new("structure description lacks its members")
                    })?;
                let mut fields = BTreeMap::new();
                for (name, description) in members {
                    fields.insert(name.clone(), Field::reconstruct(description)?);
                }
                FieldKind::Structure { fields }
            }
            "map" => {
                let value = map
                    .get("value")
                    .ok_or_else(|| SpecificationError::new("map description lacks a value"))?;
                FieldKind::Map {
                    value: Box::new(Field::reconstruct(value)?),
                }
            }
            other => {
                return Err(SpecificationError::new(format!(
                    "unknown fieldtype {other:?}"
                )))
            }
        };

        let flag = |key: &str| map.get(key).and_then(Value::as_bool).unwrap_or(false);
        Ok(Field {
            name: map.get("name").and_then(Value::as_str).map(str::to_string),
            kind,
            required: flag("required"),
            nonnull: flag("nonnull"),
            readonly: flag("readonly"),
            deferred: flag("deferred"),
            sortable: flag("sortable"),
            is_identifier: flag("is_identifier"),
            ignore_null: flag("ignore_null"),
            oncreate: map.get("oncreate").and_then(Value::as_bool),
            onupdate: map.get("onupdate").and_then(Value::as_bool),
            onput: map.get("onput").and_then(Value::as_bool),
            returned: string_list(map.get("returned")),
            operators: string_list(map.get("operators")),
            default: map.get("default").filter(|v| !v.is_null()).cloned(),
            description: map
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
