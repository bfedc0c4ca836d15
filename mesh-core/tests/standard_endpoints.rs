use std::collections::BTreeSet;

use mesh_core::schema::{Field, FieldKind};
use mesh_core::{standard_configuration, Endpoint, EndpointDecl, Resource, Status};

fn structure_keys(schema: &Option<Field>) -> BTreeSet<String> {
    schema
        .as_ref()
        .and_then(Field::structure_fields)
        .map(|fields| fields.keys().cloned().collect())
        .unwrap_or_default()
}

fn ok_response_keys(endpoint: &Endpoint) -> BTreeSet<String> {
    structure_keys(&endpoint.responses[&Status::Ok].schema)
}

fn keys<const N: usize>(names: [&str; N]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn enumeration(field: &Field) -> BTreeSet<String> {
    match &field.kind {
        FieldKind::Sequence { item, .. } => match &item.kind {
            FieldKind::Enumeration { values } => values.iter().cloned().collect(),
            _ => panic!("expected an enumeration item"),
        },
        _ => panic!("expected a sequence field"),
    }
}

#[test]
fn create_construction() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(["create"])
        .field("attr", Field::text())
        .field("locked", Field::text().readonly(true))
        .build()
        .unwrap();

    let endpoint = &resource.endpoints["create"];
    assert!(endpoint.auto_constructed);
    assert!(!endpoint.batch);
    assert_eq!(endpoint.method.as_deref(), Some("POST"));
    assert_eq!(structure_keys(&endpoint.schema), keys(["attr"]));
    assert!(!endpoint.specific);
    assert!(endpoint.subject_required);
    assert_eq!(endpoint.title.as_deref(), Some("Creating a new example"));
    assert_eq!(ok_response_keys(endpoint), keys(["id"]));
}

#[test]
fn create_includes_identifier_when_oncreate() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(["create"])
        .field("id", Field::text().oncreate(true))
        .field("attr", Field::text())
        .build()
        .unwrap();

    let endpoint = &resource.endpoints["create"];
    assert_eq!(structure_keys(&endpoint.schema), keys(["id", "attr"]));
}

#[test]
fn create_excludes_oncreate_false_fields() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(["create"])
        .field("attr", Field::text())
        .field("update_only", Field::text().oncreate(false))
        .build()
        .unwrap();

    let endpoint = &resource.endpoints["create"];
    assert_eq!(structure_keys(&endpoint.schema), keys(["attr"]));
}

#[test]
fn create_with_returning() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(["create"])
        .field("attr", Field::text())
        .endpoint("create", EndpointDecl::extending("create").support_returning(true))
        .build()
        .unwrap();

    let endpoint = &resource.endpoints["create"];
    assert_eq!(structure_keys(&endpoint.schema), keys(["attr", "returning"]));
    assert_eq!(ok_response_keys(endpoint), keys(["id", "attr"]));

    let response = endpoint.responses[&Status::Ok].schema.as_ref().unwrap();
    let fields = response.structure_fields().unwrap();
    assert!(fields["id"].required);
    assert!(!fields["attr"].required);
}

#[test]
fn create_with_returned_field() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(["create"])
        .field("attr", Field::text().returned(["create"]))
        .build()
        .unwrap();

    let endpoint = &resource.endpoints["create"];
    assert_eq!(ok_response_keys(endpoint), keys(["id", "attr"]));
}

#[test]
fn returning_field_conflict_fails() {
    let result = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(["create"])
        .field("returning", Field::text())
        .endpoint("create", EndpointDecl::extending("create").support_returning(true))
        .build();

    assert!(result.is_err());
}

#[test]
fn delete_construction() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(["delete"])
        .field("attr", Field::text())
        .build()
        .unwrap();

    let endpoint = &resource.endpoints["delete"];
    assert!(endpoint.auto_constructed);
    assert_eq!(endpoint.method.as_deref(), Some("DELETE"));
    assert!(endpoint.schema.is_none());
    assert!(endpoint.specific);
    assert!(endpoint.subject_required);
    assert_eq!(endpoint.title.as_deref(), Some("Deleting a specific example"));
    assert_eq!(ok_response_keys(endpoint), keys(["id"]));
}

#[test]
fn get_construction() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(["get"])
        .field("attr", Field::text())
        .build()
        .unwrap();

    let endpoint = &resource.endpoints["get"];
    assert_eq!(endpoint.method.as_deref(), Some("GET"));
    assert_eq!(
        structure_keys(&endpoint.schema),
        keys(["exclude", "fields", "include"])
    );
    assert!(endpoint.specific);

    let schema = endpoint.schema.as_ref().unwrap();
    let fields = schema.structure_fields().unwrap();
    assert_eq!(enumeration(&fields["fields"]), keys(["id", "attr"]));
    assert_eq!(enumeration(&fields["exclude"]), keys(["attr"]));
    assert_eq!(enumeration(&fields["include"]), keys(["id", "attr"]));

    assert_eq!(ok_response_keys(endpoint), keys(["id", "attr"]));
}

#[test]
fn put_construction() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(["put"])
        .field("attr", Field::text())
        .field("locked", Field::text().readonly(true))
        .build()
        .unwrap();

    let endpoint = &resource.endpoints["put"];
    assert_eq!(endpoint.method.as_deref(), Some("PUT"));
    assert_eq!(structure_keys(&endpoint.schema), keys(["attr"]));
    assert!(endpoint.specific);
    assert!(!endpoint.subject_required);
    assert_eq!(endpoint.title.as_deref(), Some("Putting a specific example"));
    assert_eq!(ok_response_keys(endpoint), keys(["id"]));
}

#[test]
fn put_excludes_onput_false_fields() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(["put"])
        .field("attr", Field::text())
        .field("update_only", Field::text().onput(false))
        .build()
        .unwrap();

    let endpoint = &resource.endpoints["put"];
    assert_eq!(structure_keys(&endpoint.schema), keys(["attr"]));
}

#[test]
fn update_construction() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(["update"])
        .field("attr", Field::text().required(true))
        .field("frozen", Field::text().onupdate(false))
        .build()
        .unwrap();

    let endpoint = &resource.endpoints["update"];
    assert_eq!(endpoint.method.as_deref(), Some("POST"));
    assert_eq!(structure_keys(&endpoint.schema), keys(["attr"]));
    assert!(endpoint.specific);

    // Required fields relax for partial updates.
    let schema = endpoint.schema.as_ref().unwrap();
    assert!(!schema.structure_fields().unwrap()["attr"].required);
}

#[test]
fn query_construction() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(["query"])
        .field("alpha", Field::text().sortable(true).operators(["equal", "in"]))
        .field(
            "beta",
            Field::integer().sortable(true).operators(["gt", "lt"]),
        )
        .build()
        .unwrap();

    let endpoint = &resource.endpoints["query"];
    assert!(endpoint.auto_constructed);
    assert_eq!(endpoint.method.as_deref(), Some("GET"));
    assert!(!endpoint.specific);
    assert_eq!(endpoint.title.as_deref(), Some("Querying examples"));

    let schema = endpoint.schema.as_ref().unwrap();
    let fields = schema.structure_fields().unwrap();
    assert_eq!(
        structure_keys(&endpoint.schema),
        keys(["exclude", "fields", "include", "limit", "offset", "total", "sort", "query"])
    );
    assert_eq!(enumeration(&fields["exclude"]), keys(["alpha", "beta"]));
    assert_eq!(enumeration(&fields["fields"]), keys(["id", "alpha", "beta"]));
    assert_eq!(enumeration(&fields["include"]), keys(["id", "alpha", "beta"]));
    assert!(matches!(fields["limit"].kind, FieldKind::Integer { .. }));
    assert!(matches!(fields["offset"].kind, FieldKind::Integer { .. }));
    assert!(matches!(fields["total"].kind, FieldKind::Boolean));
    assert_eq!(
        enumeration(&fields["sort"]),
        keys(["alpha", "alpha+", "alpha-", "beta", "beta+", "beta-"])
    );

    // The bare name is the equality operator; everything else is suffixed.
    let query = fields["query"].structure_fields().unwrap();
    assert_eq!(
        query.keys().cloned().collect::<BTreeSet<_>>(),
        keys(["alpha", "alpha__in", "beta__gt", "beta__lt"])
    );
    assert!(matches!(query["beta__gt"].kind, FieldKind::Integer { .. }));
    assert!(matches!(query["beta__lt"].kind, FieldKind::Integer { .. }));

    let ok = endpoint.responses[&Status::Ok].schema.as_ref().unwrap();
    assert_eq!(
        ok.structure_fields().unwrap().keys().cloned().collect::<BTreeSet<_>>(),
        keys(["total", "resources"])
    );
}

#[test]
fn request_schema_depends_only_on_resource_shape() {
    let full = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .field("attr", Field::text())
        .build()
        .unwrap();

    let only_create = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(["create"])
        .field("attr", Field::text())
        .build()
        .unwrap();

    assert_eq!(
        full.endpoints["create"].schema,
        only_create.endpoints["create"].schema
    );
}

#[test]
fn default_endpoints_are_synthesized() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .field("attr", Field::text())
        .build()
        .unwrap();

    assert_eq!(
        resource.endpoints.keys().cloned().collect::<BTreeSet<_>>(),
        keys(["create", "delete", "get", "query", "update"])
    );
}
