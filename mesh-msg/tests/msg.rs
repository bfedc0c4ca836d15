use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{json, Value};

use mesh_core::schema::Field;
use mesh_core::standard::errors_field;
use mesh_core::{
    Bundle, Configuration, ControllerFamily, Endpoint, EndpointDecl, Handler, MeshError, Mount,
    Request, Resource, ResourceFamily, Response, ServerCore, Status, SubjectValue, Version,
};
use mesh_msg::{MsgClient, MsgServer, WireReply, WireRequest};

fn id_structure() -> Field {
    Field::structure(BTreeMap::from([(
        "id".to_string(),
        Field::integer().with_name("id"),
    )]))
}

struct EchoHandler;

impl Handler for EchoHandler {
    fn acquire(&self, subject: &str) -> Option<SubjectValue> {
        Some(Box::new(subject.to_string()))
    }

    fn dispatch(
        &self,
        endpoint: &Endpoint,
        request: &Request,
        response: &mut Response,
        _subject: Option<&SubjectValue>,
        data: Option<Value>,
    ) -> Result<(), MeshError> {
        match endpoint.name.as_str() {
            "test" => {
                if let Some(caller) = request.context.get("caller") {
                    response.context.insert("caller".into(), caller.clone());
                }
                response.data = data;
                Ok(())
            }
            _ => Err(MeshError::internal("unhandled endpoint")),
        }
    }
}

fn example_server() -> Arc<MsgServer> {
    let example = Resource::builder("example", 1)
        .configuration(Arc::new(Configuration::new()))
        .endpoint(
            "test",
            EndpointDecl::new()
                .method("POST")
                .schema_field("id", Field::integer())
                .response(Status::Ok, Some(id_structure()))
                .response(Status::Invalid, Some(errors_field())),
        )
        .build()
        .unwrap();

    let examples = ResourceFamily::of([example]).unwrap();
    let controllers = ControllerFamily::builder(&examples)
        .version(Version(1, 0), Arc::new(EchoHandler))
        .build()
        .unwrap();
    let bundle = Bundle::builder("examples")
        .mount(Mount::new(&examples, &controllers))
        .build(None)
        .unwrap();

    Arc::new(MsgServer::new(ServerCore::new([bundle]).unwrap()))
}

#[test]
fn dispatch_round_trips_through_the_pipeline() {
    let server = example_server();

    let message = WireRequest {
        address: "test::/examples/1.0/example".into(),
        mimetype: Some("application/json".into()),
        context: HashMap::from([("caller".to_string(), "tester".to_string())]),
        data: Some("{\"id\": 2}".into()),
    };

    let reply = server.dispatch(&message, Some("peer"));
    assert_eq!(reply.status, Status::Ok);
    assert_eq!(reply.mimetype.as_deref(), Some("application/json"));
    assert_eq!(reply.context.get("caller").map(String::as_str), Some("tester"));
    assert_eq!(
        serde_json::from_str::<Value>(reply.data.as_deref().unwrap()).unwrap(),
        json!({"id": 2})
    );
}

#[test]
fn unknown_addresses_are_not_found() {
    let server = example_server();

    let message = WireRequest {
        address: "absent::/examples/1.0/example".into(),
        ..WireRequest::default()
    };
    assert_eq!(server.dispatch(&message, None).status, Status::NotFound);

    let message = WireRequest {
        address: "not an address".into(),
        ..WireRequest::default()
    };
    assert_eq!(server.dispatch(&message, None).status, Status::NotFound);
}

#[test]
fn unknown_mimetypes_are_bad_requests() {
    let server = example_server();

    let message = WireRequest {
        address: "test::/examples/1.0/example".into(),
        mimetype: Some("application/x-mystery".into()),
        data: Some("{}".into()),
        ..WireRequest::default()
    };
    assert_eq!(server.dispatch(&message, None).status, Status::BadRequest);
}

#[test]
fn unparseable_payloads_are_bad_requests() {
    let server = example_server();

    let message = WireRequest {
        address: "test::/examples/1.0/example".into(),
        mimetype: Some("application/json".into()),
        data: Some("{not json".into()),
        ..WireRequest::default()
    };
    assert_eq!(server.dispatch(&message, None).status, Status::BadRequest);
}

#[test]
fn error_replies_carry_the_serialized_error() {
    let server = example_server();

    let message = WireRequest {
        address: "test::/examples/1.0/example".into(),
        mimetype: Some("application/json".into()),
        data: Some("{\"id\": \"two\"}".into()),
        ..WireRequest::default()
    };

    let reply = server.dispatch(&message, None);
    assert_eq!(reply.status, Status::Invalid);
    let content: Value = serde_json::from_str(reply.data.as_deref().unwrap()).unwrap();
    assert_eq!(content["structure"]["id"]["errors"][0]["token"], "invalid");
}

#[test]
fn reply_encoding_round_trips() {
    let server = example_server();

    let message = WireRequest {
        address: "test::/examples/1.0/example".into(),
        mimetype: Some("application/json".into()),
        data: Some("{\"id\": 5}".into()),
        ..WireRequest::default()
    };

    let reply = server.dispatch(&message, None);
    let decoded = WireReply::decode(&reply.encode()).unwrap();
    assert_eq!(decoded.status, Status::Ok);
    assert_eq!(decoded.data, reply.data);
}

#[tokio::test]
async fn tcp_round_trip() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = listener.local_addr().unwrap().to_string();

    let server = example_server();
    tokio::spawn(server.serve(listener));

    let client =
        MsgClient::new(&target).with_context(HashMap::from([("caller".to_string(), "tester".to_string())]));

    let response = client
        .execute("test::/examples/1.0/example", None, Some(json!({"id": 2})), None)
        .await
        .unwrap();
    assert_eq!(response.status, Some(Status::Ok));
    assert_eq!(response.data, Some(json!({"id": 2})));
    assert_eq!(response.context.get("caller").map(String::as_str), Some("tester"));

    match client
        .execute("absent::/examples/1.0/example", None, None, None)
        .await
    {
        Err(MeshError::Request(error)) => assert_eq!(error.status, Status::NotFound),
        other => panic!("expected a not-found error, got {other:?}"),
    }
}
