//! End-to-end pipeline tests.
//!
//! These drive buffered `http::Request`s through a fully assembled
//! [`Pipeline`] and check the envelopes, headers and ordering guarantees
//! callers rely on.

use agora_core::validator::ValidatorOptions;
use agora_core::{
    AgoraError, ApiRequest, BoxFuture, HandlerRegistry, InterfaceSchema, Operation, ParamSpec,
    ParamType, Reply, RequestContext, Schema,
};
use agora_middleware::stages::{
    CorsStage, FnGate, MemorySessionStore, SchemaDocsStage, Session, SessionConfig, SessionStage,
    StaticFilesStage,
};
use agora_middleware::{Phase, Pipeline, Response, Stage, Step};
use bytes::Bytes;
use http::{header, Method, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn items_schema() -> Arc<InterfaceSchema> {
    Arc::new(
        InterfaceSchema::builder("items")
            .operation(
                Operation::builder("getItem")
                    .path("/items/{id}")
                    .param(ParamSpec::path("id", ParamType::Integer))
                    .build()
                    .unwrap(),
            )
            .operation(
                Operation::builder("searchItems")
                    .path("/items")
                    .param(ParamSpec::query("q", ParamType::String).required())
                    .build()
                    .unwrap(),
            )
            .operation(
                Operation::builder("createItem")
                    .method(Method::POST)
                    .path("/items")
                    .body(Schema::object([("name", Schema::string())], ["name"]))
                    .build()
                    .unwrap(),
            )
            .operation(
                Operation::builder("bookSlot")
                    .method(Method::POST)
                    .path("/slots/{id}")
                    .param(ParamSpec::path("id", ParamType::Integer))
                    .build()
                    .unwrap(),
            )
            .operation(Operation::builder("getTag").path("/tags/{label}").build().unwrap())
            .operation(Operation::builder("visits").path("/visits").build().unwrap())
            .operation(
                Operation::builder("archive")
                    .path("/archive")
                    .example(200, json!({ "archived": [] }))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap(),
    )
}

fn items_handlers(calls: Arc<AtomicUsize>) -> HandlerRegistry {
    let get_calls = Arc::clone(&calls);
    let search_calls = Arc::clone(&calls);
    HandlerRegistry::new()
        .with("getItem", move |_ctx, req: Arc<ApiRequest>| {
            let calls = Arc::clone(&get_calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let id: i64 = req.path_param_as("id")?;
                if id == 42 {
                    return Err(AgoraError::domain_not_found("Item", id.to_string()));
                }
                Ok(Reply::ok(json!({ "id": id, "name": format!("item-{id}") })))
            }
        })
        .with("searchItems", move |_ctx, req: Arc<ApiRequest>| {
            let calls = Arc::clone(&search_calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Reply::ok(json!({ "q": req.query["q"] })))
            }
        })
        .with("createItem", |_ctx, req: Arc<ApiRequest>| async move {
            Ok(Reply::created(json!({ "name": req.body["name"] })))
        })
        .with("bookSlot", |_ctx, _req| async {
            Err::<Reply, _>(
                AgoraError::domain("SLOT_ALREADY_BOOKED", "Slot is taken")
                    .with_status(StatusCode::CONFLICT),
            )
        })
        .with("getTag", |_ctx, req: Arc<ApiRequest>| async move {
            Ok(Reply::ok(json!({ "label": req.path_params["label"] })))
        })
        .with("visits", |ctx: Arc<RequestContext>, _req| async move {
            let session = ctx
                .get::<Session>()
                .cloned()
                .ok_or_else(|| AgoraError::internal("no session"))?;
            let visits = session.get_as::<u64>("visits").unwrap_or(0) + 1;
            session.insert("visits", visits);
            Ok(Reply::ok(json!({ "visits": visits })))
        })
}

fn request(method: Method, uri: &str) -> http::Request<Bytes> {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .body(Bytes::new())
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn basic_pipeline() -> (Pipeline, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::builder(items_schema(), items_handlers(Arc::clone(&calls))).build();
    (pipeline, calls)
}

#[tokio::test]
async fn test_success_returns_data_envelope() {
    let (pipeline, _) = basic_pipeline();
    let response = pipeline.process(request(Method::GET, "/items/7")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json; charset=utf-8"
    );
    let body = body_json(response).await;
    assert_eq!(body, json!({ "success": true, "data": { "id": 7, "name": "item-7" } }));
}

#[tokio::test]
async fn test_domain_not_found_is_404_envelope() {
    let (pipeline, _) = basic_pipeline();
    let response = pipeline.process(request(Method::GET, "/items/42")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert!(body.get("data").is_none());
}

#[tokio::test]
async fn test_unknown_route_is_route_not_found() {
    let (pipeline, calls) = basic_pipeline();
    let response = pipeline.process(request(Method::GET, "/nowhere")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "ROUTE_NOT_FOUND");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_path_params_reach_handler_decoded() {
    let (pipeline, _) = basic_pipeline();
    let response = pipeline.process(request(Method::GET, "/tags/ada%20lovelace")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["label"], "ada lovelace");

    let response = pipeline.process(request(Method::GET, "/tags/%FF")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "MALFORMED_PATH");
}

#[tokio::test]
async fn test_method_not_allowed_lists_allowed_methods() {
    let pipeline = Pipeline::builder(items_schema(), items_handlers(Arc::new(AtomicUsize::new(0))))
        .validator_options(ValidatorOptions {
            distinguish_method_not_allowed: true,
        })
        .build();
    let response = pipeline.process(request(Method::DELETE, "/items")).await;

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "GET, POST");
    assert_eq!(body_json(response).await["error"]["code"], "METHOD_NOT_ALLOWED");
}

#[tokio::test]
async fn test_missing_required_param_never_reaches_handler() {
    let (pipeline, calls) = basic_pipeline();
    let response = pipeline.process(request(Method::GET, "/items")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_FAILED");
    assert_eq!(body["error"]["detail"]["fields"][0]["field"], "q");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_query_values_reach_handler() {
    let (pipeline, calls) = basic_pipeline();
    let response = pipeline.process(request(Method::GET, "/items?q=lamp")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["q"], "lamp");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_json_body_is_validated_and_parsed() {
    let (pipeline, _) = basic_pipeline();

    let created = http::Request::builder()
        .method(Method::POST)
        .uri("/items")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Bytes::from_static(br#"{"name":"lamp"}"#))
        .unwrap();
    let response = pipeline.process(created).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["data"]["name"], "lamp");

    let malformed = http::Request::builder()
        .method(Method::POST)
        .uri("/items")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Bytes::from_static(b"{not json"))
        .unwrap();
    let response = pipeline.process(malformed).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "MALFORMED_BODY");
}

#[tokio::test]
async fn test_domain_rule_code_is_preserved() {
    let (pipeline, _) = basic_pipeline();
    let response = pipeline.process(request(Method::POST, "/slots/3")).await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "SLOT_ALREADY_BOOKED");
    assert_eq!(body["error"]["message"], "Slot is taken");
}

#[tokio::test]
async fn test_missing_handler_is_501() {
    let (pipeline, _) = basic_pipeline();
    let response = pipeline.process(request(Method::GET, "/archive")).await;

    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body_json(response).await["error"]["code"], "NOT_IMPLEMENTED");
}

#[tokio::test]
async fn test_mocked_pipeline_serves_examples_and_schema_document() {
    let schema = items_schema();
    let docs = SchemaDocsStage::new(&schema).unwrap();
    let pipeline = Pipeline::builder(Arc::clone(&schema), items_handlers(Arc::new(AtomicUsize::new(0))))
        .schema_docs(docs)
        .mock_unbound(true)
        .build();

    let response = pipeline.process(request(Method::GET, "/archive")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"], json!({ "archived": [] }));

    // Bound operations still reach their handlers.
    let response = pipeline.process(request(Method::GET, "/items/7")).await;
    assert_eq!(body_json(response).await["data"]["name"], "item-7");

    let response = pipeline.process(request(Method::GET, "/api-docs")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let document = body_json(response).await;
    assert_eq!(document["title"], "items");
    let ids: Vec<&str> = document["operations"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|op| op["operation_id"].as_str())
        .collect();
    assert!(ids.contains(&"archive") && ids.contains(&"getItem"));
}

#[tokio::test]
async fn test_every_response_carries_request_id() {
    let (pipeline, _) = basic_pipeline();
    for (method, uri) in [
        (Method::GET, "/items/1"),
        (Method::GET, "/items/42"),
        (Method::GET, "/nowhere"),
        (Method::GET, "/items"),
    ] {
        let response = pipeline.process(request(method, uri)).await;
        assert!(
            response.headers().contains_key("x-request-id"),
            "missing request id for {uri}"
        );
    }
}

#[tokio::test]
async fn test_cors_headers_on_error_responses() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::builder(items_schema(), items_handlers(calls))
        .cors(CorsStage::builder().allow_origin("https://shop.example").build())
        .build();

    let req = http::Request::builder()
        .uri("/items/42")
        .header(header::ORIGIN, "https://shop.example")
        .body(Bytes::new())
        .unwrap();
    let response = pipeline.process(req).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "https://shop.example"
    );
}

#[tokio::test]
async fn test_preflight_short_circuits() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::builder(items_schema(), items_handlers(Arc::clone(&calls)))
        .cors(CorsStage::permissive())
        .build();

    let req = http::Request::builder()
        .method(Method::OPTIONS)
        .uri("/items/1")
        .header(header::ORIGIN, "https://shop.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .body(Bytes::new())
        .unwrap();
    let response = pipeline.process(req).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_static_file_served_before_validation() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("robots.txt"), "User-agent: *\n").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::builder(items_schema(), items_handlers(Arc::clone(&calls)))
        .static_files(StaticFilesStage::new(dir.path()))
        .build();

    let response = pipeline.process(request(Method::GET, "/robots.txt")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"User-agent: *\n");

    // Not a file, so the request falls through to the schema.
    let response = pipeline.process(request(Method::GET, "/items/5")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_gatekeepers_run_in_order_and_stop_at_first_failure() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (first, second) = (Arc::clone(&seen), Arc::clone(&seen));
    let calls = Arc::new(AtomicUsize::new(0));

    let pipeline = Pipeline::builder(items_schema(), items_handlers(Arc::clone(&calls)))
        .gatekeeper(FnGate::new("first", move |_ctx, _req| {
            first.lock().unwrap().push("first");
            Err(AgoraError::forbidden("closed for inventory"))
        }))
        .gatekeeper(FnGate::new("second", move |_ctx, _req| {
            second.lock().unwrap().push("second");
            Ok(())
        }))
        .build();

    let response = pipeline.process(request(Method::GET, "/items/1")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"]["code"], "FORBIDDEN");
    assert_eq!(*seen.lock().unwrap(), vec!["first"]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_gatekeeper_sees_coerced_params() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::builder(items_schema(), items_handlers(calls))
        .gatekeeper(FnGate::new("small_ids", |_ctx, req| {
            match req.path_param("id").and_then(Value::as_i64) {
                Some(id) if id > 100 => Err(AgoraError::forbidden("id out of range")),
                _ => Ok(()),
            }
        }))
        .build();

    let response = pipeline.process(request(Method::GET, "/items/500")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = pipeline.process(request(Method::GET, "/items/5")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

struct Counting {
    phase: Phase,
    name: &'static str,
    handled: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl Stage for Counting {
    fn name(&self) -> &'static str {
        self.name
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn handle<'a>(
        &'a self,
        _ctx: &'a mut RequestContext,
        _request: &'a mut ApiRequest,
    ) -> BoxFuture<'a, Step> {
        Box::pin(async move {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Step::Continue
        })
    }

    fn after<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        _request: &'a ApiRequest,
        _response: &'a mut Response,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.finished.fetch_add(1, Ordering::SeqCst);
        })
    }
}

#[tokio::test]
async fn test_stages_entered_once_and_skipped_after_short_circuit() {
    let early = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    let late = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    let calls = Arc::new(AtomicUsize::new(0));

    let pipeline = Pipeline::builder(items_schema(), items_handlers(calls))
        .stage(Counting {
            phase: Phase::Locals,
            name: "early",
            handled: Arc::clone(&early.0),
            finished: Arc::clone(&early.1),
        })
        .stage(Counting {
            phase: Phase::Gatekeeper,
            name: "late",
            handled: Arc::clone(&late.0),
            finished: Arc::clone(&late.1),
        })
        .build();

    pipeline.process(request(Method::GET, "/items/1")).await;
    assert_eq!(early.0.load(Ordering::SeqCst), 1);
    assert_eq!(early.1.load(Ordering::SeqCst), 1);
    assert_eq!(late.0.load(Ordering::SeqCst), 1);
    assert_eq!(late.1.load(Ordering::SeqCst), 1);

    // Validation fails, so the gatekeeper-phase stage is never entered.
    pipeline.process(request(Method::GET, "/nowhere")).await;
    assert_eq!(early.0.load(Ordering::SeqCst), 2);
    assert_eq!(early.1.load(Ordering::SeqCst), 2);
    assert_eq!(late.0.load(Ordering::SeqCst), 1);
    assert_eq!(late.1.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_session_cookie_is_reused() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::builder(items_schema(), items_handlers(calls))
        .session(SessionStage::new(SessionConfig::default(), MemorySessionStore::new()))
        .build();

    let first = pipeline.process(request(Method::GET, "/visits")).await;
    let set_cookie = first
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.starts_with("JSESSION="));
    assert!(set_cookie.contains("HttpOnly"));
    assert_eq!(body_json(first).await["data"]["visits"], 1);

    let cookie = set_cookie.split(';').next().unwrap().to_string();
    let second = http::Request::builder()
        .uri("/visits")
        .header(header::COOKIE, cookie)
        .body(Bytes::new())
        .unwrap();
    let second = pipeline.process(second).await;
    assert!(second.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(body_json(second).await["data"]["visits"], 2);
}

#[tokio::test]
async fn test_cookieless_traffic_leaves_store_empty() {
    let store = MemorySessionStore::new();
    let pipeline = Pipeline::builder(items_schema(), items_handlers(Arc::new(AtomicUsize::new(0))))
        .session(SessionStage::new(SessionConfig::default(), store.clone()))
        .build();

    for _ in 0..1000 {
        let response = pipeline.process(request(Method::GET, "/items/7")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }
    assert!(store.is_empty());
}
