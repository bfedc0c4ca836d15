//! The standard endpoints synthesized from a resource's shape.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use crate::endpoint::{Endpoint, EndpointDecl, EndpointResponse};
use crate::error::SpecificationError;
use crate::resource::{Configuration, EndpointConstructor, Resource};
use crate::schema::{Field, Schema};
use crate::status::Status;

/// The field name reserved for per-request returning.
pub const RETURNING: &str = "returning";

/// The endpoints synthesized when a resource does not request an explicit
/// set.
pub const DEFAULT_ENDPOINTS: [&str; 5] = ["create", "delete", "get", "query", "update"];

/// The endpoints validators apply to when they declare no explicit targets.
pub const VALIDATED_ENDPOINTS: [&str; 3] = ["create", "put", "update"];

/// The standard configuration: all six constructors, the default and
/// validated endpoint lists, and a nonnull integer identifier.
pub fn standard_configuration() -> Arc<Configuration> {
    Arc::new(
        Configuration::new()
            .standard_endpoint("create", Arc::new(ConstructCreateEndpoint))
            .standard_endpoint("delete", Arc::new(ConstructDeleteEndpoint))
            .standard_endpoint("get", Arc::new(ConstructGetEndpoint))
            .standard_endpoint("put", Arc::new(ConstructPutEndpoint))
            .standard_endpoint("query", Arc::new(ConstructQueryEndpoint))
            .standard_endpoint("update", Arc::new(ConstructUpdateEndpoint))
            .default_endpoints(DEFAULT_ENDPOINTS)
            .validated_endpoints(VALIDATED_ENDPOINTS),
    )
}

/// The canonical `{errors, structure}` payload shape returned with INVALID.
pub fn errors_field() -> Field {
    Field::structure(BTreeMap::from([
        ("errors".to_string(), Field::any().with_name("errors")),
        ("structure".to_string(), Field::any().with_name("structure")),
    ]))
    .with_name("errors")
}

/// Clone a schema field for use inside an endpoint schema, shedding the
/// declaration-side flags.
fn stripped(field: &Field, name: Option<&str>, description: Option<&str>) -> Field {
    let mut field = field
        .clone()
        .nonnull(true)
        .required(false)
        .readonly(false)
        .deferred(false)
        .sortable(false)
        .ignore_null(false)
        .operators(Vec::<String>::new());
    field.default = None;
    field.name = name.map(str::to_string);
    field.description = description.map(str::to_string);
    field
}

// ── Query operators ─────────────────────────────────────────────────────

const OPERATORS: [(&str, &str); 17] = [
    ("equal", "Equals."),
    ("iequal", "Case-insensitive equals."),
    ("not", "Not equal."),
    ("inot", "Case-insensitive not equal."),
    ("prefix", "Prefix search."),
    ("iprefix", "Case-insensitive prefix search."),
    ("suffix", "Suffix search."),
    ("isuffix", "Case-insensitive suffix search."),
    ("contains", "Contains."),
    ("icontains", "Case-insensitive contains."),
    ("gt", "Greater than."),
    ("gte", "Greater than or equal to."),
    ("lt", "Less than."),
    ("lte", "Less than or equal to."),
    ("null", "Is null."),
    ("in", "In given values."),
    ("notin", "Not in given values."),
];

/// Expand a field's declared operator set into query sub-fields, using the
/// bare field name for `equal` and `<field>__<op>` for everything else.
fn construct_operators(operators: &mut BTreeMap<String, Field>, field: &Field) {
    let field_name = match &field.name {
        Some(name) => name.clone(),
        None => return,
    };

    for operator in &field.operators {
        let description = match OPERATORS.iter().find(|(name, _)| *name == operator.as_str()) {
            Some((_, description)) => *description,
            None => continue,
        };

        let operator_field = match operator.as_str() {
            "equal" => stripped(field, Some(&field_name), Some(description)),
            "in" | "notin" => {
                let name = format!("{field_name}__{operator}");
                Field::sequence(stripped(field, None, None))
                    .with_name(name)
                    .nonnull(true)
                    .describe_as(description)
            }
            "null" => Field::boolean()
                .with_name(format!("{field_name}__null"))
                .nonnull(true)
                .describe_as(description),
            _ => {
                let name = format!("{field_name}__{operator}");
                stripped(field, Some(&name), Some(description))
            }
        };

        let key = operator_field.name.clone().unwrap_or_default();
        operators.insert(key, operator_field);
    }
}

// ── Shared construction helpers ─────────────────────────────────────────

fn enumeration_field(
    fields: &Schema,
    name: &str,
    include_identifier: bool,
    description: &str,
) -> Field {
    let mut tokens: Vec<String> = fields
        .iter()
        .filter(|(_, field)| include_identifier || !field.is_identifier)
        .map(|(name, _)| name.clone())
        .collect();
    tokens.sort();

    Field::sequence(Field::enumeration(tokens).nonnull(true))
        .with_name(name)
        .unique(true)
        .describe_as(description)
}

fn fields_field(fields: &Schema) -> Field {
    enumeration_field(
        fields,
        "fields",
        true,
        "The exact fields which should be returned in this request.",
    )
}

fn include_field(fields: &Schema) -> Field {
    enumeration_field(
        fields,
        "include",
        true,
        "Fields which should be returned for this request.",
    )
}

fn exclude_field(fields: &Schema) -> Field {
    enumeration_field(
        fields,
        "exclude",
        false,
        "Fields which should not be returned for this request.",
    )
}

fn construct_responses(
    declaration: Option<&EndpointDecl>,
    valid_schema: Field,
) -> BTreeMap<Status, EndpointResponse> {
    let valid = declaration
        .and_then(|decl| decl.valid_responses.clone())
        .unwrap_or_else(|| vec![Status::Ok]);
    let invalid = declaration
        .and_then(|decl| decl.invalid_responses.clone())
        .unwrap_or_else(|| vec![Status::Invalid]);

    let mut responses = BTreeMap::new();
    for status in valid {
        responses.insert(status, EndpointResponse::new(status, Some(valid_schema.clone())));
    }
    for status in invalid {
        responses.insert(status, EndpointResponse::new(status, Some(errors_field())));
    }
    responses
}

fn returning_field(resource: &Resource) -> Field {
    let mut tokens: Vec<String> = resource.schema.names().cloned().collect();
    tokens.sort();
    Field::sequence(Field::enumeration(tokens).nonnull(true)).with_name(RETURNING)
}

/// The response-side view of the schema: identifier required, everything
/// else optional.
fn response_schema(resource: &Resource) -> Schema {
    let mut schema = Schema::new();
    for (name, field) in resource.schema.iter() {
        if field.is_identifier {
            schema.insert(name.clone(), field.clone().required(true));
        } else if field.required {
            schema.insert(name.clone(), field.clone().required(false));
        } else {
            schema.insert(name.clone(), field.clone());
        }
    }
    schema
}

fn is_returned(field: &Field, endpoint: &str) -> bool {
    field.returned.iter().any(|name| name == endpoint)
}

fn supports_returning(
    resource: &Resource,
    declaration: Option<&EndpointDecl>,
) -> Result<bool, SpecificationError> {
    let supported = declaration.map(|decl| decl.support_returning).unwrap_or(false);
    if supported && resource.schema.contains(RETURNING) {
        return Err(SpecificationError::new(format!(
            "resource {:?} declares a returning field and cannot support returning",
            resource.name.as_deref().unwrap_or("")
        )));
    }
    Ok(supported)
}

/// The response schema of a mutation endpoint: identifier plus returned
/// fields, everything else only under `support_returning`.
fn mutation_response(resource: &Resource, endpoint: &str, support_returning: bool) -> Schema {
    let mut schema = Schema::new();
    for (name, field) in resource.schema.iter() {
        if field.is_identifier || is_returned(field, endpoint) {
            schema.insert(name.clone(), field.clone().required(true));
        } else if support_returning {
            schema.insert(name.clone(), field.clone().required(false));
        }
    }
    schema
}

fn base_endpoint(resource: &Resource, name: &str, method: &str) -> Endpoint {
    let mut endpoint = Endpoint::empty(name, resource.name.clone().unwrap_or_default());
    endpoint.method = Some(method.to_string());
    endpoint.auto_constructed = true;
    endpoint
}

// ── Constructors ────────────────────────────────────────────────────────

pub struct ConstructCreateEndpoint;

impl EndpointConstructor for ConstructCreateEndpoint {
    fn construct(
        &self,
        resource: &Resource,
        declaration: Option<&EndpointDecl>,
    ) -> Result<Endpoint, SpecificationError> {
        let mut schema = Schema::new();
        for (name, field) in resource.schema.filter(|field| !field.readonly).iter() {
            if field.is_identifier {
                if field.oncreate == Some(true) {
                    schema.insert(name.clone(), field.clone().ignore_null(true));
                }
            } else if field.oncreate != Some(false) {
                schema.insert(name.clone(), field.clone());
            }
        }

        let support_returning = supports_returning(resource, declaration)?;
        if support_returning {
            schema.insert(RETURNING, returning_field(resource));
        }

        let responses = construct_responses(
            declaration,
            mutation_response(resource, "create", support_returning)
                .to_structure(Some("response")),
        );

        let mut endpoint = base_endpoint(resource, "create", "POST");
        endpoint.schema = Some(schema.to_structure(Some("resource")));
        endpoint.responses = responses;
        endpoint.title = Some(format!("Creating a new {}", resource.title.to_lowercase()));
        Ok(endpoint)
    }
}

pub struct ConstructDeleteEndpoint;

impl EndpointConstructor for ConstructDeleteEndpoint {
    fn construct(
        &self,
        resource: &Resource,
        declaration: Option<&EndpointDecl>,
    ) -> Result<Endpoint, SpecificationError> {
        let mut schema = Schema::new();
        if let Some(id_field) = resource.identifier() {
            schema.insert(
                id_field.name.clone().unwrap_or_default(),
                id_field.clone().required(true),
            );
        }

        let responses = construct_responses(declaration, schema.to_structure(Some("response")));

        let mut endpoint = base_endpoint(resource, "delete", "DELETE");
        endpoint.responses = responses;
        endpoint.specific = true;
        endpoint.title = Some(format!(
            "Deleting a specific {}",
            resource.title.to_lowercase()
        ));
        Ok(endpoint)
    }
}

pub struct ConstructGetEndpoint;

impl EndpointConstructor for ConstructGetEndpoint {
    fn construct(
        &self,
        resource: &Resource,
        declaration: Option<&EndpointDecl>,
    ) -> Result<Endpoint, SpecificationError> {
        let fields = response_schema(resource);

        let mut schema = Schema::new();
        schema.insert("exclude", exclude_field(&fields));
        schema.insert("fields", fields_field(&fields));
        schema.insert("include", include_field(&fields));

        let responses = construct_responses(declaration, fields.to_structure(Some("response")));

        let mut endpoint = base_endpoint(resource, "get", "GET");
        endpoint.schema = Some(schema.to_structure(None));
        endpoint.responses = responses;
        endpoint.specific = true;
        endpoint.title = Some(format!(
            "Getting a specific {}",
            resource.title.to_lowercase()
        ));
        Ok(endpoint)
    }
}

pub struct ConstructPutEndpoint;

impl EndpointConstructor for ConstructPutEndpoint {
    fn construct(
        &self,
        resource: &Resource,
        declaration: Option<&EndpointDecl>,
    ) -> Result<Endpoint, SpecificationError> {
        let mut schema = Schema::new();
        for (name, field) in resource.schema.filter(|field| !field.readonly).iter() {
            if !field.is_identifier && field.onput != Some(false) {
                schema.insert(name.clone(), field.clone());
            }
        }

        let support_returning = supports_returning(resource, declaration)?;
        if support_returning {
            schema.insert(RETURNING, returning_field(resource));
        }

        let responses = construct_responses(
            declaration,
            mutation_response(resource, "put", support_returning).to_structure(Some("response")),
        );

        let mut endpoint = base_endpoint(resource, "put", "PUT");
        endpoint.schema = Some(schema.to_structure(Some("resource")));
        endpoint.responses = responses;
        endpoint.specific = true;
        endpoint.subject_required = false;
        endpoint.title = Some(format!(
            "Putting a specific {}",
            resource.title.to_lowercase()
        ));
        Ok(endpoint)
    }
}

pub struct ConstructQueryEndpoint;

impl EndpointConstructor for ConstructQueryEndpoint {
    fn construct(
        &self,
        resource: &Resource,
        declaration: Option<&EndpointDecl>,
    ) -> Result<Endpoint, SpecificationError> {
        let fields = response_schema(resource);

        let mut schema = Schema::new();
        schema.insert("exclude", exclude_field(&fields));
        schema.insert("fields", fields_field(&fields));
        schema.insert("include", include_field(&fields));
        schema.insert(
            "limit",
            Field::integer()
                .minimum(0)
                .describe_as("The maximum number of resources to return."),
        );
        schema.insert(
            "offset",
            Field::integer()
                .minimum(0)
                .default_value(json!(0))
                .describe_as("The offset of the first resource to return."),
        );
        schema.insert(
            "total",
            Field::boolean()
                .nonnull(true)
                .default_value(json!(false))
                .describe_as("If true, only return the total for this query."),
        );

        let mut sort_tokens = Vec::new();
        for (name, field) in fields.iter() {
            if field.sortable {
                for suffix in ["", "+", "-"] {
                    sort_tokens.push(format!("{name}{suffix}"));
                }
            }
        }
        if !sort_tokens.is_empty() {
            sort_tokens.sort();
            schema.insert(
                "sort",
                Field::sequence(Field::enumeration(sort_tokens).nonnull(true))
                    .describe_as("The sort order for this query."),
            );
        }

        let mut operators = BTreeMap::new();
        for (_, field) in fields.iter() {
            if !field.operators.is_empty() {
                construct_operators(&mut operators, field);
            }
        }
        if let Some(declaration) = declaration {
            for (name, field) in &declaration.operators {
                operators.insert(name.clone(), field.clone().with_name(name.clone()));
            }
        }
        if !operators.is_empty() {
            schema.insert(
                "query",
                Field::structure(operators)
                    .describe_as("The query by which to filter resources."),
            );
        }

        let response = Schema::from_iter([
            (
                "total".to_string(),
                Field::integer()
                    .nonnull(true)
                    .minimum(0)
                    .describe_as("The total number of resources matching this query."),
            ),
            (
                "resources".to_string(),
                Field::sequence(fields.to_structure(None)).nonnull(true),
            ),
        ]);

        let responses = construct_responses(declaration, response.to_structure(Some("response")));

        let mut endpoint = base_endpoint(resource, "query", "GET");
        endpoint.schema = Some(schema.to_structure(None));
        endpoint.responses = responses;
        endpoint.title = Some(format!(
            "Querying {}",
            pluralize(&resource.title.to_lowercase())
        ));
        Ok(endpoint)
    }
}

pub struct ConstructUpdateEndpoint;

impl EndpointConstructor for ConstructUpdateEndpoint {
    fn construct(
        &self,
        resource: &Resource,
        declaration: Option<&EndpointDecl>,
    ) -> Result<Endpoint, SpecificationError> {
        let mut schema = Schema::new();
        for (name, field) in resource.schema.filter(|field| !field.readonly).iter() {
            if !field.is_identifier && field.onupdate != Some(false) {
                let field = if field.required {
                    field.clone().required(false)
                } else {
                    field.clone()
                };
                schema.insert(name.clone(), field);
            }
        }

        let support_returning = supports_returning(resource, declaration)?;
        if support_returning {
            schema.insert(RETURNING, returning_field(resource));
        }

        let responses = construct_responses(
            declaration,
            mutation_response(resource, "update", support_returning)
                .to_structure(Some("response")),
        );

        let mut endpoint = base_endpoint(resource, "update", "POST");
        endpoint.schema = Some(schema.to_structure(Some("resource")));
        endpoint.responses = responses;
        endpoint.specific = true;
        endpoint.title = Some(format!(
            "Updating a specific {}",
            resource.title.to_lowercase()
        ));
        Ok(endpoint)
    }
}

/// Naive English pluralization for endpoint titles.
fn pluralize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ife") {
        return format!("{stem}ives");
    }
    if let Some(stem) = word.strip_suffix("eau") {
        return format!("{stem}eaux");
    }
    if let Some(stem) = word.strip_suffix("lf") {
        return format!("{stem}lves");
    }
    if word.ends_with(['s', 'x', 'z']) {
        return format!("{word}es");
    }
    if word.ends_with('h') {
        let mut chars = word.chars().rev();
        chars.next();
        if let Some(previous) = chars.next() {
            if !"aeioudgkprt".contains(previous) {
                return format!("{word}es");
            }
        }
    }
    if word.ends_with('y') {
        let mut chars = word.chars().rev();
        chars.next();
        match chars.next() {
            Some(previous) if !"aeiou".contains(previous) => {
                return format!("{}ies", &word[..word.len() - 1]);
            }
            _ => {}
        }
    }
    format!("{word}s")
}
