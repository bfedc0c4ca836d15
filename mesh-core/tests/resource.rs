use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{json, Value};

use mesh_core::schema::{Field, FieldKind};
use mesh_core::standard::errors_field;
use mesh_core::{
    standard_configuration, Configuration, EndpointDecl, Resource, ResourceBuilder,
    ResourceFamily, Status, StructuralError, Validator,
};

fn names<'a, I: IntoIterator<Item = &'a String>>(iter: I) -> BTreeSet<String> {
    iter.into_iter().cloned().collect()
}

#[test]
fn construction_installs_the_identifier() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .field("attr", Field::text())
        .build()
        .unwrap();

    assert_eq!(resource.name.as_deref(), Some("example"));
    assert_eq!(resource.version, Some(1));
    assert_eq!(resource.title, "Example");
    assert!(resource.schema.contains("id"));
    assert!(resource.schema.get("id").unwrap().is_identifier);
    assert_eq!(resource.id_field.as_deref(), Some("id"));
}

#[test]
fn declared_identifier_is_marked() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .field("id", Field::text())
        .build()
        .unwrap();

    let id = resource.schema.get("id").unwrap();
    assert!(id.is_identifier);
    assert!(matches!(id.kind, FieldKind::Text));
}

#[test]
fn removed_identifier_stays_removed() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(Vec::<String>::new())
        .field("attr", Field::text())
        .remove_field("id")
        .build()
        .unwrap();

    assert!(!resource.schema.contains("id"));
    assert!(resource.id_field.is_none());
}

#[test]
fn invalid_version_is_rejected() {
    let result = Resource::builder("example", 0)
        .configuration(standard_configuration())
        .build();
    assert!(result.is_err());
}

#[test]
fn invalid_composite_key_is_rejected() {
    let result = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .field("attr", Field::text())
        .composite_key(["attr", "missing"])
        .build();
    assert!(result.is_err());
}

#[test]
fn unknown_standard_endpoint_is_rejected() {
    let result = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(["levitate"])
        .build();
    assert!(result.is_err());
}

#[test]
fn inheritance_merges_schema_and_endpoints() {
    let base = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .field("attr", Field::text())
        .field("extra", Field::integer())
        .build()
        .unwrap();

    let derived = Resource::builder("example", 2)
        .inherit(&base)
        .field("more", Field::boolean())
        .remove_field("extra")
        .build()
        .unwrap();

    assert_eq!(
        names(derived.schema.names()),
        ["attr", "id", "more"].iter().map(|s| s.to_string()).collect()
    );
    // Inherited auto-constructed endpoints are re-synthesized against the
    // new schema.
    let create = &derived.endpoints["create"];
    let fields = create.schema.as_ref().unwrap().structure_fields().unwrap();
    assert!(fields.contains_key("more"));
    assert!(!fields.contains_key("extra"));
}

#[test]
fn abstract_bases_compose() {
    let abstract_base = ResourceBuilder::abstract_base()
        .configuration(standard_configuration())
        .field("attr", Field::text())
        .build()
        .unwrap();
    assert!(abstract_base.is_abstract);
    assert!(abstract_base.name.is_none());

    let concrete = Resource::builder("example", 1)
        .inherit(&abstract_base)
        .field("own", Field::integer())
        .build()
        .unwrap();

    assert!(concrete.schema.contains("attr"));
    assert!(concrete.schema.contains("own"));
}

#[test]
fn abstract_resources_reject_concrete_bases() {
    let concrete = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .build()
        .unwrap();

    let result = ResourceBuilder::abstract_base().inherit(&concrete).build();
    assert!(result.is_err());
}

#[test]
fn multiple_concrete_bases_are_rejected() {
    let first = Resource::builder("first", 1)
        .configuration(standard_configuration())
        .build()
        .unwrap();
    let second = Resource::builder("second", 1)
        .configuration(standard_configuration())
        .build()
        .unwrap();

    let result = Resource::builder("example", 1)
        .inherit(&first)
        .inherit(&second)
        .build();
    assert!(result.is_err());
}

#[test]
fn declared_endpoints_resolve_schema_references() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(Vec::<String>::new())
        .field("referenced", Field::integer())
        .endpoint(
            "operation",
            EndpointDecl::new()
                .method("OPERATION")
                .schema_ref("referenced", "referenced")
                .response(Status::Ok, None),
        )
        .build()
        .unwrap();

    let endpoint = &resource.endpoints["operation"];
    assert!(!endpoint.auto_constructed);
    let fields = endpoint.schema.as_ref().unwrap().structure_fields().unwrap();
    assert_eq!(names(fields.keys()), names(&["referenced".to_string()]));
    assert!(matches!(fields["referenced"].kind, FieldKind::Integer { .. }));
}

#[test]
fn field_overlay_inserts_renames_and_removes() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(Vec::<String>::new())
        .field("referenced", Field::integer())
        .endpoint(
            "first",
            EndpointDecl::new()
                .schema_field("id", Field::integer())
                .schema_field("name", Field::text())
                .response(Status::Ok, None),
        )
        .endpoint(
            "second",
            EndpointDecl::extending("first")
                .field("attr", Field::text())
                .field("value", Field::float())
                .remove_field("name")
                .remove_field("not_present")
                .field_ref("referenced", "referenced")
                .field_ref("renamed", "referenced"),
        )
        .build()
        .unwrap();

    let endpoint = &resource.endpoints["second"];
    let fields = endpoint.schema.as_ref().unwrap().structure_fields().unwrap();
    assert_eq!(
        names(fields.keys()),
        ["id", "attr", "value", "referenced", "renamed"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    );
    assert_eq!(fields["renamed"].name.as_deref(), Some("renamed"));
}

#[test]
fn unknown_field_reference_is_rejected() {
    let result = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .endpoints(Vec::<String>::new())
        .endpoint(
            "operation",
            EndpointDecl::new().field_ref("bad_ref", "bad_ref"),
        )
        .build();
    assert!(result.is_err());
}

#[test]
fn validators_attach_to_their_endpoints() {
    fn reject_ones(data: &Value) -> Result<(), StructuralError> {
        if data["attr"] == json!("one") {
            Err(StructuralError::new("incorrect"))
        } else {
            Ok(())
        }
    }

    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .field("attr", Field::text())
        .validator(Validator::new("reject_ones", reject_ones).attr("attr"))
        .build()
        .unwrap();

    // Configuration default: create, put, update; only create and update
    // are present among the default endpoints.
    assert_eq!(resource.endpoints["create"].validators.len(), 1);
    assert_eq!(resource.endpoints["update"].validators.len(), 1);
    assert!(resource.endpoints["get"].validators.is_empty());
    assert!(resource.endpoints["query"].validators.is_empty());

    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .field("attr", Field::text())
        .validator(
            Validator::new("reject_ones", reject_ones).endpoints(["delete"]),
        )
        .build()
        .unwrap();
    assert_eq!(resource.endpoints["delete"].validators.len(), 1);
    assert!(resource.endpoints["create"].validators.is_empty());
}

#[test]
fn auto_constructed_endpoints_are_replaced_on_extension() {
    let base = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .field("attr", Field::text())
        .build()
        .unwrap();
    assert!(base.endpoints["create"].auto_constructed);

    let derived = Resource::builder("example", 2)
        .inherit(&base)
        .endpoint(
            "create",
            EndpointDecl::extending("create").metadata("audited", json!(true)),
        )
        .build()
        .unwrap();

    let create = &derived.endpoints["create"];
    assert!(!create.auto_constructed);
    assert_eq!(create.metadata["audited"], json!(true));
    assert_eq!(create.method.as_deref(), Some("POST"));
}

#[test]
fn removed_endpoints_stay_removed() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .field("attr", Field::text())
        .remove_endpoint("delete")
        .build()
        .unwrap();

    assert!(!resource.endpoints.contains_key("delete"));
    assert!(resource.endpoints.contains_key("create"));
}

#[test]
fn duplicate_versions_are_rejected_in_a_family() {
    let one = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .build()
        .unwrap();
    let other = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .build()
        .unwrap();

    let mut family = ResourceFamily::new();
    family.insert(one).unwrap();
    assert!(family.insert(other).is_err());
}

#[test]
fn describe_reconstruct_round_trip() {
    let configuration = standard_configuration();
    let resource = Resource::builder("example", 1)
        .configuration(configuration.clone())
        .title("Example")
        .field("attr", Field::text().sortable(true).operators(["equal", "in"]))
        .field("beta", Field::integer())
        .composite_key(["attr", "beta"])
        .endpoint(
            "operation",
            EndpointDecl::new()
                .method("OPERATION")
                .specific(true)
                .schema_field("attr", Field::text())
                .response(
                    Status::Ok,
                    Some(Field::structure(
                        [("id".to_string(), Field::integer().with_name("id"))]
                            .into_iter()
                            .collect(),
                    )),
                )
                .response(Status::Invalid, Some(errors_field())),
        )
        .build()
        .unwrap();

    let description = resource.describe(None, None, false, None);
    assert_eq!(description["__subject__"], "resource");

    let rebuilt = Resource::reconstruct(&description, configuration).unwrap();

    assert_eq!(rebuilt.name, resource.name);
    assert_eq!(rebuilt.version, resource.version);
    assert_eq!(rebuilt.composite_key, resource.composite_key);
    assert_eq!(rebuilt.schema, resource.schema);
    assert_eq!(rebuilt.id_field, resource.id_field);
    assert_eq!(
        names(rebuilt.endpoints.keys()),
        names(resource.endpoints.keys())
    );

    for (name, endpoint) in &resource.endpoints {
        let twin = &rebuilt.endpoints[name];
        assert_eq!(twin.method, endpoint.method);
        assert_eq!(twin.specific, endpoint.specific);
        assert_eq!(twin.subject_required, endpoint.subject_required);
        assert_eq!(twin.schema, endpoint.schema);
        for (status, response) in &endpoint.responses {
            assert_eq!(twin.responses[status].schema, response.schema);
        }
    }
}

#[test]
fn describe_with_omissions_bares_the_field() {
    let resource = Resource::builder("example", 1)
        .configuration(standard_configuration())
        .field("attr", Field::text().sortable(true))
        .build()
        .unwrap();

    let omissions = vec!["attr".to_string()];
    let description = resource.describe(None, None, false, Some(&omissions));

    assert_eq!(description["schema"]["attr"]["fieldtype"], "field");
    assert_eq!(description["schema"]["attr"]["name"], "attr");
    assert_eq!(description["schema"]["id"]["fieldtype"], "integer");
}

#[test]
fn default_handler_answers_unimplemented() {
    use std::collections::HashMap;
    use mesh_core::{Bundle, InternalServer, Mount, ServerCore};

    let configuration = standard_configuration();
    let resource = Resource::builder("example", 1)
        .configuration(configuration)
        .field("attr", Field::text())
        .build()
        .unwrap();
    let family = ResourceFamily::of([resource]).unwrap();

    let bundle = Bundle::builder("bare")
        .mount(Mount::resource(&family))
        .build(None)
        .unwrap();
    let server = InternalServer::new(ServerCore::new([bundle]).unwrap());

    let address = mesh_core::Address::parse("create::/bare/1.0/example").unwrap();
    let response = server.dispatch(&address, HashMap::new(), None);
    assert_eq!(response.status, Some(Status::Unimplemented));
}

#[test]
fn configuration_without_standard_endpoints_builds_bare_resources() {
    let resource = Resource::builder("example", 1)
        .configuration(Arc::new(Configuration::new()))
        .field("attr", Field::text())
        .build()
        .unwrap();

    assert!(resource.endpoints.is_empty());
    assert!(resource.schema.contains("id"));
}
