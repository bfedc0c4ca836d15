use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use mesh_core::schema::Field;
use mesh_core::standard::errors_field;
use mesh_core::{
    Address, Endpoint, EndpointResponse, Handler, Mediator, MeshError, Request, RequestError,
    Response, Status, StructuralError, SubjectValue, Validator, Version,
};

fn id_structure() -> Field {
    Field::structure(BTreeMap::from([(
        "id".to_string(),
        Field::integer().with_name("id"),
    )]))
}

fn example_endpoint() -> Endpoint {
    let mut endpoint = Endpoint::empty("test", "resource");
    endpoint.auto_constructed = true;
    endpoint.schema = Some(id_structure());
    endpoint.responses.insert(
        Status::Ok,
        EndpointResponse::new(Status::Ok, Some(id_structure())),
    );
    endpoint.responses.insert(
        Status::Invalid,
        EndpointResponse::new(Status::Invalid, Some(errors_field())),
    );
    endpoint
}

type Callback = Box<dyn Fn(Option<Value>) -> Result<(), MeshError> + Send + Sync>;

#[derive(Default)]
struct Harness {
    expected_subject: Option<String>,
    subject: Option<String>,
    status: Option<Status>,
    data: Option<Value>,
    callback: Option<Callback>,
}

impl Handler for Harness {
    fn acquire(&self, subject: &str) -> Option<SubjectValue> {
        assert_eq!(Some(subject), self.expected_subject.as_deref());
        self.subject
            .clone()
            .map(|subject| Box::new(subject) as SubjectValue)
    }

    fn dispatch(
        &self,
        _endpoint: &Endpoint,
        _request: &Request,
        response: &mut Response,
        _subject: Option<&SubjectValue>,
        data: Option<Value>,
    ) -> Result<(), MeshError> {
        if let Some(callback) = &self.callback {
            return callback(data);
        }
        if let Some(status) = self.status {
            response.set(status);
        }
        if self.data.is_some() {
            response.data = self.data.clone();
        }
        Ok(())
    }
}

fn request_response(subject: Option<&str>, data: Option<Value>) -> (Request, Response) {
    let mut address = Address {
        endpoint: Some("test".into()),
        bundle: vec![("bundle".into(), Version(1, 0))],
        resource: Some("resource".into()),
        ..Address::default()
    };
    if let Some(subject) = subject {
        address = address.with_subject(subject);
    }

    let mut request = Request::new(address);
    request.data = data;
    (request, Response::new())
}

#[test]
fn basic_successful_processing() {
    let mut endpoint = example_endpoint();
    endpoint.schema = None;

    let harness = Harness {
        status: Some(Status::Ok),
        data: Some(json!({"id": 1})),
        ..Harness::default()
    };
    let (request, mut response) = request_response(None, None);
    endpoint.process(&harness, &request, &mut response, &[]);

    assert_eq!(response.status, Some(Status::Ok));
    assert_eq!(response.data, Some(json!({"id": 1})));
}

#[test]
fn improper_subject_returns_bad_request() {
    let endpoint = example_endpoint();
    let harness = Harness::default();
    let (request, mut response) = request_response(Some("2"), None);
    endpoint.process(&harness, &request, &mut response, &[]);

    assert_eq!(response.status, Some(Status::BadRequest));
}

#[test]
fn improper_data_returns_bad_request() {
    let mut endpoint = example_endpoint();
    endpoint.schema = None;

    let harness = Harness::default();
    let (request, mut response) = request_response(None, Some(json!({"id": 1})));
    endpoint.process(&harness, &request, &mut response, &[]);

    assert_eq!(response.status, Some(Status::BadRequest));
}

#[test]
fn implicit_status_is_ok() {
    let endpoint = example_endpoint();
    let harness = Harness::default();
    let (request, mut response) = request_response(None, None);
    endpoint.process(&harness, &request, &mut response, &[]);

    assert_eq!(response.status, Some(Status::Ok));
}

#[test]
fn structural_error_from_dispatch_is_invalid() {
    let endpoint = example_endpoint();
    let harness = Harness {
        callback: Some(Box::new(|_| {
            Err(MeshError::Structural(StructuralError::new("incorrect")))
        })),
        ..Harness::default()
    };
    let (request, mut response) = request_response(None, None);
    endpoint.process(&harness, &request, &mut response, &[]);

    assert_eq!(response.status, Some(Status::Invalid));
    assert_eq!(
        response.data,
        Some(json!({"errors": [{"token": "incorrect"}], "structure": null}))
    );
}

#[test]
fn request_error_passes_through() {
    let endpoint = example_endpoint();
    let harness = Harness {
        callback: Some(Box::new(|_| {
            Err(MeshError::Request(RequestError::new(Status::Conflict)))
        })),
        ..Harness::default()
    };
    let (request, mut response) = request_response(None, None);
    endpoint.process(&harness, &request, &mut response, &[]);

    assert_eq!(response.status, Some(Status::Conflict));
}

#[test]
fn uncaught_error_becomes_server_error() {
    let endpoint = example_endpoint();
    let harness = Harness {
        callback: Some(Box::new(|_| Err(MeshError::internal("testing")))),
        ..Harness::default()
    };
    let (request, mut response) = request_response(None, None);
    endpoint.process(&harness, &request, &mut response, &[]);

    assert_eq!(response.status, Some(Status::ServerError));
    assert_eq!(response.data, None);
}

#[test]
fn undeclared_status_with_data_becomes_server_error() {
    let endpoint = example_endpoint();

    // Recognized error status with no data passes through untouched.
    let harness = Harness {
        status: Some(Status::Conflict),
        ..Harness::default()
    };
    let (request, mut response) = request_response(None, None);
    endpoint.process(&harness, &request, &mut response, &[]);
    assert_eq!(response.status, Some(Status::Conflict));

    // The same status carrying data is a contract violation.
    let harness = Harness {
        status: Some(Status::Conflict),
        data: Some(json!("testing")),
        ..Harness::default()
    };
    let (request, mut response) = request_response(None, None);
    endpoint.process(&harness, &request, &mut response, &[]);
    assert_eq!(response.status, Some(Status::ServerError));
}

#[test]
fn subject_resolution() {
    let mut endpoint = example_endpoint();
    endpoint.specific = true;

    // A subject the handler cannot acquire is GONE.
    let harness = Harness {
        expected_subject: Some("2".into()),
        ..Harness::default()
    };
    let (request, mut response) = request_response(Some("2"), None);
    endpoint.process(&harness, &request, &mut response, &[]);
    assert_eq!(response.status, Some(Status::Gone));

    // A specific endpoint without a subject is a bad request.
    let (request, mut response) = request_response(None, None);
    endpoint.process(&harness, &request, &mut response, &[]);
    assert_eq!(response.status, Some(Status::BadRequest));

    // A resolvable subject proceeds to dispatch.
    let harness = Harness {
        expected_subject: Some("2".into()),
        subject: Some("2".into()),
        ..Harness::default()
    };
    let (request, mut response) = request_response(Some("2"), None);
    endpoint.process(&harness, &request, &mut response, &[]);
    assert_eq!(response.status, Some(Status::Ok));
}

#[test]
fn optional_subject_proceeds_to_dispatch() {
    let mut endpoint = example_endpoint();
    endpoint.specific = true;
    endpoint.subject_required = false;

    let harness = Harness {
        expected_subject: Some("2".into()),
        ..Harness::default()
    };
    let (request, mut response) = request_response(Some("2"), None);
    endpoint.process(&harness, &request, &mut response, &[]);

    assert_eq!(response.status, Some(Status::Ok));
}

#[test]
fn request_validation() {

    let mut endpoint = example_endpoint();
    endpoint.schema = Some(Field::structure(BTreeMap::from([(
        "id".to_string(),
        Field::integer().with_name("id").maximum(1),
    )])));

    let harness = Harness::default();
    let (request, mut response) = request_response(None, Some(json!({"id": 1})));
    endpoint.process(&harness, &request, &mut response, &[]);
    assert_eq!(response.status, Some(Status::Ok));

    let (request, mut response) = request_response(None, Some(json!({"id": 2})));
    endpoint.process(&harness, &request, &mut response, &[]);
    assert_eq!(response.status, Some(Status::Invalid));

    let error = response.data.unwrap();
    assert_eq!(error["structure"]["id"]["errors"][0]["token"], "maximum");
}

#[test]
fn response_validation() {

    let mut endpoint = example_endpoint();
    endpoint.responses.insert(
        Status::Ok,
        EndpointResponse::new(
            Status::Ok,
            Some(Field::structure(BTreeMap::from([(
                "id".to_string(),
                Field::integer().with_name("id").required(true),
            )]))),
        ),
    );

    let harness = Harness {
        data: Some(json!({"id": 1})),
        ..Harness::default()
    };
    let (request, mut response) = request_response(None, None);
    endpoint.process(&harness, &request, &mut response, &[]);
    assert_eq!(response.status, Some(Status::Ok));

    // A response missing its required field is a server-side failure and
    // surfaces no partial data.
    let harness = Harness {
        data: Some(json!({})),
        ..Harness::default()
    };
    let (request, mut response) = request_response(None, None);
    endpoint.process(&harness, &request, &mut response, &[]);
    assert_eq!(response.status, Some(Status::ServerError));
    assert_eq!(response.data, None);

    // Data without a declared response schema is equally a failure.
    let mut endpoint = example_endpoint();
    endpoint
        .responses
        .insert(Status::Ok, EndpointResponse::new(Status::Ok, None));
    let harness = Harness {
        data: Some(json!({"id": 1})),
        ..Harness::default()
    };
    let (request, mut response) = request_response(None, None);
    endpoint.process(&harness, &request, &mut response, &[]);
    assert_eq!(response.status, Some(Status::ServerError));
}

#[test]
fn general_validators() {
    let mut endpoint = example_endpoint();
    endpoint.validators.push(Arc::new(Validator::new(
        "check_id",
        |data: &Value| {
            if data["id"] != json!(2) {
                Err(StructuralError::new("incorrect"))
            } else {
                Ok(())
            }
        },
    )));

    let harness = Harness::default();
    let (request, mut response) = request_response(None, Some(json!({"id": 2})));
    endpoint.process(&harness, &request, &mut response, &[]);
    assert_eq!(response.status, Some(Status::Ok));

    let (request, mut response) = request_response(None, Some(json!({"id": 1})));
    endpoint.process(&harness, &request, &mut response, &[]);
    assert_eq!(response.status, Some(Status::Invalid));
    assert_eq!(
        response.data,
        Some(json!({"errors": [{"token": "incorrect"}], "structure": null}))
    );
}

#[test]
fn attribute_validators_merge_under_their_target() {
    let mut endpoint = example_endpoint();
    endpoint.validators.push(Arc::new(
        Validator::new("check_id", |data: &Value| {
            if data["id"] != json!(2) {
                Err(StructuralError::new("incorrect"))
            } else {
                Ok(())
            }
        })
        .attr("id"),
    ));

    let harness = Harness::default();
    let (request, mut response) = request_response(None, Some(json!({"id": 1})));
    endpoint.process(&harness, &request, &mut response, &[]);

    assert_eq!(response.status, Some(Status::Invalid));
    let error = response.data.unwrap();
    assert_eq!(error["errors"], json!(null));
    assert_eq!(error["structure"]["id"]["errors"][0]["token"], "incorrect");
}

#[test]
fn mediation_short_circuits_before_validation() {
    struct TestMediator;

    impl Mediator for TestMediator {
        fn before_validation(
            &self,
            _endpoint: &Endpoint,
            request: &Request,
            response: &mut Response,
        ) -> Result<(), StructuralError> {
            match request.address.subject.as_ref().and_then(|s| s.value()) {
                Some("1") => {
                    response.set(Status::Gone);
                    Ok(())
                }
                Some("2") => Ok(()),
                _ => Err(StructuralError::new("incorrect")),
            }
        }
    }

    let mut endpoint = example_endpoint();
    endpoint.specific = true;
    let mediators: Vec<Arc<dyn Mediator>> = vec![Arc::new(TestMediator)];

    let harness = Harness {
        expected_subject: Some("2".into()),
        subject: Some("2".into()),
        ..Harness::default()
    };
    let (request, mut response) = request_response(Some("2"), None);
    endpoint.process(&harness, &request, &mut response, &mediators);
    assert_eq!(response.status, Some(Status::Ok));

    let harness = Harness::default();
    let (request, mut response) = request_response(Some("1"), None);
    endpoint.process(&harness, &request, &mut response, &mediators);
    assert_eq!(response.status, Some(Status::Gone));

    let (request, mut response) = request_response(Some("3"), None);
    endpoint.process(&harness, &request, &mut response, &mediators);
    assert_eq!(response.status, Some(Status::Invalid));
    assert_eq!(
        response.data,
        Some(json!({"errors": [{"token": "incorrect"}], "structure": null}))
    );
}

#[test]
fn description_and_reconstruction() {
    let mut original = example_endpoint();
    original.method = Some("POST".into());
    original
        .metadata
        .insert("attr".into(), json!("value"));

    let description = original.describe(None, false, None);
    assert_eq!(description["name"], "test");
    assert_eq!(description["schema"]["fieldtype"], "structure");
    assert!(description["responses"]["OK"].is_object());
    assert!(description["responses"]["INVALID"].is_object());

    let endpoint = Endpoint::reconstruct("resource", &description).unwrap();
    assert_eq!(endpoint.name, original.name);
    assert_eq!(endpoint.method, original.method);
    assert_eq!(endpoint.schema, original.schema);
    assert_eq!(
        endpoint.responses.keys().collect::<Vec<_>>(),
        original.responses.keys().collect::<Vec<_>>()
    );
    // Metadata exists only server-side.
    assert!(endpoint.metadata.is_empty());
}

#[test]
fn attach_binds_resource_and_endpoint() {
    let mut endpoint = example_endpoint();
    endpoint.resource_name = "example".into();

    let address = Address {
        bundle: vec![("bundle".into(), Version(1, 0))],
        ..Address::default()
    };
    let attached = endpoint.attach(&address);

    assert_eq!(attached.to_string(), "test::/bundle/1.0/example");
}
