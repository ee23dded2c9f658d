//! Handlers for the bundled `interface.json`: an item catalogue and slot holds.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use agora::cache::EphemeralCache;
use agora::core::{AgoraError, AgoraResult, ApiRequest, HandlerRegistry, Reply, RequestContext};
use agora::middleware::stages::{Environment, Locals};
use http::StatusCode;
use parking_lot::Mutex;
use serde_json::{json, Value};

/// How long a slot hold lasts.
pub const HOLD_TTL: Duration = Duration::from_secs(15 * 60);

/// In-memory item catalogue.
#[derive(Debug, Default)]
pub struct Catalogue {
    items: Mutex<BTreeMap<i64, Value>>,
}

impl Catalogue {
    fn get(&self, id: i64) -> AgoraResult<Value> {
        self.items
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| AgoraError::domain_not_found("Item", id.to_string()))
    }

    fn create(&self, name: &str, qty: i64) -> AgoraResult<Value> {
        let mut items = self.items.lock();
        if items.values().any(|item| item["name"] == name) {
            return Err(AgoraError::domain(
                "ITEM_EXISTS",
                format!("An item named '{name}' already exists"),
            )
            .with_status(StatusCode::CONFLICT));
        }
        let id = items.keys().next_back().map_or(1, |last| last + 1);
        let item = json!({ "id": id, "name": name, "qty": qty });
        items.insert(id, item.clone());
        Ok(item)
    }

    fn remove(&self, id: i64) -> AgoraResult<Value> {
        self.items
            .lock()
            .remove(&id)
            .ok_or_else(|| AgoraError::domain_not_found("Item", id.to_string()))
    }
}

fn cache(ctx: &RequestContext) -> AgoraResult<&EphemeralCache> {
    ctx.get::<EphemeralCache>()
        .ok_or_else(|| AgoraError::internal("request cache is not attached"))
}

fn body_str<'a>(req: &'a ApiRequest, field: &str) -> AgoraResult<&'a str> {
    req.body[field]
        .as_str()
        .ok_or_else(|| AgoraError::validation(format!("'{field}' must be a string")))
}

/// Builds the handler registry over a shared catalogue.
pub fn handlers(catalogue: Arc<Catalogue>) -> HandlerRegistry {
    let list = Arc::clone(&catalogue);
    let get = Arc::clone(&catalogue);
    let create = Arc::clone(&catalogue);
    let remove = catalogue;

    HandlerRegistry::new()
        .with("getStatus", |ctx: Arc<RequestContext>, _req| async move {
            let environment = ctx.get::<Environment>().cloned().unwrap_or_default();
            let service = ctx
                .get::<Locals>()
                .and_then(|locals| locals.get("service").cloned())
                .unwrap_or(Value::Null);
            Ok(Reply::ok(json!({
                "service": service,
                "environment": environment.name(),
            })))
        })
        .with("listItems", move |_ctx, _req| {
            let catalogue = Arc::clone(&list);
            async move {
                let items: Vec<Value> = catalogue.items.lock().values().cloned().collect();
                Ok(Reply::ok(Value::Array(items)))
            }
        })
        .with("getItem", move |_ctx, req: Arc<ApiRequest>| {
            let catalogue = Arc::clone(&get);
            async move { Ok(Reply::ok(catalogue.get(req.path_param_as("id")?)?)) }
        })
        .with("createItem", move |_ctx, req: Arc<ApiRequest>| {
            let catalogue = Arc::clone(&create);
            async move {
                let name = body_str(&req, "name")?;
                let qty = req.body["qty"].as_i64().unwrap_or(0);
                Ok(Reply::created(catalogue.create(name, qty)?))
            }
        })
        .with("deleteItem", move |_ctx, req: Arc<ApiRequest>| {
            let catalogue = Arc::clone(&remove);
            async move { Ok(Reply::ok(catalogue.remove(req.path_param_as("id")?)?)) }
        })
        .with("holdSlot", |ctx: Arc<RequestContext>, req: Arc<ApiRequest>| async move {
            let slot: i64 = req.path_param_as("slot")?;
            let name = body_str(&req, "name")?;
            let cache = cache(&ctx)?;
            let hold = json!({ "slot": slot, "name": name, "expires_in": HOLD_TTL.as_secs() });
            if !cache.set_if_absent(format!("slot:{slot}"), hold.clone(), Some(HOLD_TTL)) {
                return Err(AgoraError::domain(
                    "SLOT_ALREADY_HELD",
                    format!("Slot {slot} is already held"),
                )
                .with_status(StatusCode::CONFLICT));
            }
            Ok(Reply::created(hold))
        })
        .with("releaseSlot", |ctx: Arc<RequestContext>, req: Arc<ApiRequest>| async move {
            let slot: i64 = req.path_param_as("slot")?;
            cache(&ctx)?
                .take(&format!("slot:{slot}"))
                .map(Reply::ok)
                .ok_or_else(|| AgoraError::domain_not_found("Slot hold", slot.to_string()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora::config::AgoraConfig;
    use agora::core::InterfaceSchema;
    use agora_test::TestClient;
    use std::path::Path;

    fn client() -> TestClient {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../interface.json");
        let schema = InterfaceSchema::load(path).unwrap();
        let mut config = AgoraConfig::development();
        config.static_files.enabled = false;
        config.session.enabled = false;
        let mut locals = serde_json::Map::new();
        locals.insert("service".into(), json!("agora-demo"));

        let pipeline = agora::pipeline_builder(
            &config,
            Arc::new(schema),
            handlers(Arc::new(Catalogue::default())),
            EphemeralCache::default(),
            locals,
        )
        .build();
        TestClient::new(pipeline)
    }

    #[tokio::test]
    async fn test_every_operation_has_a_handler() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../interface.json");
        let schema = InterfaceSchema::load(path).unwrap();
        let registry = handlers(Arc::new(Catalogue::default()));
        assert!(registry.unbound(&schema).is_empty());
        assert!(registry.undeclared(&schema).is_empty());
    }

    #[tokio::test]
    async fn test_status_reports_locals_and_environment() {
        let data = client().get("/status").send().await.assert_ok(StatusCode::OK);
        assert_eq!(data["service"], "agora-demo");
        assert_eq!(data["environment"], "development");
    }

    #[tokio::test]
    async fn test_item_lifecycle() {
        let client = client();

        client
            .get("/items/42")
            .send()
            .await
            .assert_error(StatusCode::NOT_FOUND, "NOT_FOUND");

        let item = client
            .post("/items")
            .json(&json!({ "name": "lamp", "qty": 2 }))
            .send()
            .await
            .assert_ok(StatusCode::CREATED);
        assert_eq!(item, json!({ "id": 1, "name": "lamp", "qty": 2 }));

        client
            .post("/items")
            .json(&json!({ "name": "lamp" }))
            .send()
            .await
            .assert_error(StatusCode::CONFLICT, "ITEM_EXISTS");

        let items = client.get("/items").send().await.assert_ok(StatusCode::OK);
        assert_eq!(items.as_array().map(Vec::len), Some(1));

        client.delete("/items/1").send().await.assert_ok(StatusCode::OK);
        client
            .get("/items/1")
            .send()
            .await
            .assert_error(StatusCode::NOT_FOUND, "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_create_item_requires_name() {
        client()
            .post("/items")
            .json(&json!({ "qty": 1 }))
            .send()
            .await
            .assert_error(StatusCode::BAD_REQUEST, "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn test_slot_hold_conflicts_until_released() {
        let client = client();

        let hold = client
            .post("/slots/9/hold")
            .json(&json!({ "name": "Ada" }))
            .send()
            .await
            .assert_ok(StatusCode::CREATED);
        assert_eq!(hold["slot"], 9);

        client
            .post("/slots/9/hold")
            .json(&json!({ "name": "Grace" }))
            .send()
            .await
            .assert_error(StatusCode::CONFLICT, "SLOT_ALREADY_HELD");

        let released = client.delete("/slots/9/hold").send().await.assert_ok(StatusCode::OK);
        assert_eq!(released["name"], "Ada");

        client
            .post("/slots/9/hold")
            .json(&json!({ "name": "Grace" }))
            .send()
            .await
            .assert_ok(StatusCode::CREATED);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_holds_have_one_winner() {
        let client = Arc::new(client());
        let mut tasks = Vec::new();
        for i in 0..16 {
            let client = Arc::clone(&client);
            tasks.push(tokio::spawn(async move {
                client
                    .post("/slots/12/hold")
                    .json(&json!({ "name": format!("caller-{i}") }))
                    .send()
                    .await
                    .status()
            }));
        }

        let mut created = 0;
        for task in tasks {
            let status = task.await.unwrap();
            if status == StatusCode::CREATED {
                created += 1;
            } else {
                assert_eq!(status, StatusCode::CONFLICT);
            }
        }
        assert_eq!(created, 1);
    }
}
