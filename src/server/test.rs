// src/server/test.rs - Routes against a fake upstream

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use super::build_router;
use crate::cache::now_ms;
use crate::config::Config;
use crate::connectors::three_commas::config::ACCOUNTS_NEW_PATH;
use crate::connectors::three_commas::{CreateAccountRequest, DebugBuild, ThreeCommasRestClient};
use crate::connectors::traits::ThreeCommasApi;
use crate::error::{AppError, Result};
use crate::signing::sign;
use crate::state::AppState;

struct FakeUpstream {
    /// `None` answers account creation with a 401.
    create_response: Option<Value>,
    /// `Some((status, retry_after))` fails balance reads.
    balances_error: Option<(u16, Option<u64>)>,
    balances_body: Value,
    create_calls: AtomicUsize,
    balance_calls: AtomicUsize,
    list_params: Mutex<Vec<(String, String)>>,
    signer: ThreeCommasRestClient,
}

impl FakeUpstream {
    fn new(config: &Config) -> Self {
        Self {
            create_response: Some(json!({"id": 555, "name": "New account"})),
            balances_error: None,
            balances_body: json!({"balances": [
                {"currency_code": "USDT", "amount": "100.5"},
                {"currency_code": "BTC", "amount": "0.25"}
            ]}),
            create_calls: AtomicUsize::new(0),
            balance_calls: AtomicUsize::new(0),
            list_params: Mutex::new(Vec::new()),
            signer: ThreeCommasRestClient::new(config.three_commas.clone()).unwrap(),
        }
    }
}

#[async_trait]
impl ThreeCommasApi for FakeUpstream {
    async fn create_binance_account(&self, _request: &CreateAccountRequest) -> Result<Value> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        match &self.create_response {
            Some(body) => Ok(body.clone()),
            None => Err(AppError::Upstream {
                status: 401,
                body: json!({"error": "signature_invalid"}),
                retry_after: None,
            }),
        }
    }

    async fn get_account_balances(&self, _account_id: &str) -> Result<Value> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        match self.balances_error {
            Some((status, retry_after)) => Err(AppError::Upstream {
                status,
                body: json!({"error": "rate_limit"}),
                retry_after,
            }),
            None => Ok(self.balances_body.clone()),
        }
    }

    async fn list_accounts(&self, params: &[(String, String)]) -> Result<Value> {
        *self.list_params.lock().unwrap() = params.to_vec();
        Ok(json!([{"id": 1}]))
    }

    fn debug_build(&self, request: &CreateAccountRequest) -> Result<DebugBuild> {
        self.signer.debug_build(request)
    }
}

fn test_config(dir: &TempDir, debug: bool) -> Config {
    let mut config = Config::default();
    config.three_commas.api_key = Some("key".to_string());
    config.three_commas.api_secret = Some("secret".to_string());
    config.three_commas.debug = debug;
    config.store.data_file = dir
        .path()
        .join("userAccounts.json")
        .to_string_lossy()
        .into_owned();
    // Nothing listens here; the feed just keeps retrying in the background.
    config.market_feed.ws_base = "ws://127.0.0.1:9".to_string();
    config
}

/// Router served on an ephemeral local port.
struct TestApp {
    base_url: String,
    client: reqwest::Client,
}

enum TestRequest {
    Get(String),
    Post(String, String),
}

async fn serve(state: Arc<AppState>) -> TestApp {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestApp {
        base_url: format!("http://{}", addr),
        client: reqwest::Client::new(),
    }
}

async fn setup_with(config: Config, fake: FakeUpstream) -> (Arc<AppState>, Arc<FakeUpstream>, TestApp) {
    let fake = Arc::new(fake);
    let state = AppState::with_upstream(config, fake.clone()).unwrap();
    let app = serve(state.clone()).await;
    (state, fake, app)
}

async fn setup(dir: &TempDir, debug: bool) -> (Arc<AppState>, Arc<FakeUpstream>, TestApp) {
    let config = test_config(dir, debug);
    let fake = FakeUpstream::new(&config);
    setup_with(config, fake).await
}

fn get(uri: &str) -> TestRequest {
    TestRequest::Get(uri.to_string())
}

fn post_json(uri: &str, body: Value) -> TestRequest {
    TestRequest::Post(uri.to_string(), body.to_string())
}

async fn send(app: &TestApp, request: TestRequest) -> (u16, Value) {
    let response = match request {
        TestRequest::Get(uri) => app.client.get(format!("{}{}", app.base_url, uri)).send(),
        TestRequest::Post(uri, body) => app
            .client
            .post(format!("{}{}", app.base_url, uri))
            .header("content-type", "application/json")
            .body(body)
            .send(),
    }
    .await
    .unwrap();
    let status = response.status().as_u16();
    let text = response.text().await.unwrap();
    let body = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn root_and_health() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, app) = setup(&dir, false).await;

    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"ok": true, "service": "threecommas-proxy"}));

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"ok": true}));
}

#[tokio::test]
async fn create_account_requires_binance_keys() {
    let dir = tempfile::tempdir().unwrap();
    let (_, fake, app) = setup(&dir, false).await;

    let (status, body) = send(
        &app,
        post_json("/create-account", json!({"binanceApiKey": "k"})),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["ok"], false);
    assert_eq!(fake.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn create_account_rejects_malformed_json() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, app) = setup(&dir, false).await;

    let request = TestRequest::Post("/create-account".to_string(), "{not json".to_string());
    let (status, body) = send(&app, request).await;
    assert_eq!(status, 400);
    assert_eq!(body["ok"], false);
}

#[tokio::test]
async fn create_account_links_user() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _, app) = setup(&dir, false).await;

    let (status, body) = send(
        &app,
        post_json(
            "/create-account",
            json!({"binanceApiKey": "bk", "binanceApiSecret": "bs", "userId": 42}),
        ),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);
    assert_eq!(body["data"]["id"], 555);

    assert_eq!(state.store.account_id("42").await.as_deref(), Some("555"));
    let creds = state.store.binance_credentials("42").await.unwrap();
    assert_eq!(creds.api_key, "bk");
    assert_eq!(creds.api_secret, "bs");
}

#[tokio::test]
async fn upstream_errors_keep_their_status() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir, false);
    let fake = FakeUpstream {
        create_response: None,
        ..FakeUpstream::new(&config)
    };
    let (state, _, app) = setup_with(config, fake).await;

    let (status, body) = send(
        &app,
        post_json(
            "/create-account",
            json!({"binanceApiKey": "bk", "binanceApiSecret": "bs", "userId": "u1"}),
        ),
    )
    .await;
    assert_eq!(status, 401);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "Upstream error");
    assert_eq!(body["details"]["error"], "signature_invalid");
    assert_eq!(state.store.account_id("u1").await, None);
}

#[tokio::test]
async fn probe_accounts_forwards_query() {
    let dir = tempfile::tempdir().unwrap();
    let (_, fake, app) = setup(&dir, false).await;

    let (status, body) = send(&app, get("/probe-accounts?limit=5")).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"][0]["id"], 1);
    assert_eq!(
        *fake.list_params.lock().unwrap(),
        vec![("limit".to_string(), "5".to_string())]
    );
}

#[tokio::test]
async fn balances_for_unknown_user_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (_, fake, app) = setup(&dir, false).await;

    let (status, body) = send(&app, get("/accounts/nobody/balances")).await;
    assert_eq!(status, 404);
    assert_eq!(body["ok"], false);
    assert_eq!(fake.balance_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn balances_are_fetched_once_then_cached() {
    let dir = tempfile::tempdir().unwrap();
    let (state, fake, app) = setup(&dir, false).await;
    state.store.save_account_id("u1", "999").await.unwrap();

    let (status, body) = send(&app, get("/accounts/u1/balances")).await;
    assert_eq!(status, 200);
    assert_eq!(body["accountId"], "999");
    assert_eq!(body["cached"], false);
    assert_eq!(
        body["balances"],
        json!([
            {"asset": "USDT", "balance": 100.5},
            {"asset": "BTC", "balance": 0.25}
        ])
    );

    let (status, body) = send(&app, get("/accounts/u1/balances")).await;
    assert_eq!(status, 200);
    assert_eq!(body["cached"], true);
    assert_eq!(fake.balance_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rate_limit_opens_ban_window() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir, false);
    let fake = FakeUpstream {
        balances_error: Some((429, Some(30))),
        ..FakeUpstream::new(&config)
    };
    let (state, fake, app) = setup_with(config, fake).await;
    state.store.save_account_id("u1", "999").await.unwrap();

    let before = now_ms();
    let (status, body) = send(&app, get("/accounts/u1/balances")).await;
    assert_eq!(status, 429);
    assert_eq!(body["error"], "Upstream error");
    assert!(state.cache.binance_ban_until() >= before + 30_000);
    assert!(state.cache.is_binance_banned_now());

    // While banned the upstream is not asked again.
    let (status, body) = send(&app, get("/accounts/u1/balances")).await;
    assert_eq!(status, 429);
    assert_eq!(body["error"], "Rate limited by upstream");
    assert_eq!(fake.balance_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn teapot_without_retry_after_uses_default_ban() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir, false);
    let fake = FakeUpstream {
        balances_error: Some((418, None)),
        ..FakeUpstream::new(&config)
    };
    let (state, _, app) = setup_with(config, fake).await;
    state.store.save_account_id("u1", "999").await.unwrap();

    let before = now_ms();
    let (status, _) = send(&app, get("/accounts/u1/balances")).await;
    assert_eq!(status, 418);
    assert!(state.cache.binance_ban_until() >= before + 60_000);
}

#[tokio::test]
async fn price_subscribes_and_reads_cache() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _, app) = setup(&dir, false).await;
    state.cache.set_cached_price("BTCUSDT", 50000.5);

    let (status, body) = send(&app, get("/price/btcusdt")).await;
    assert_eq!(status, 200);
    assert_eq!(body["symbol"], "BTCUSDT");
    assert_eq!(body["price"], 50000.5);
    assert_eq!(state.feed.wanted_streams().await, vec!["btcusdt@bookTicker"]);

    let (_, body) = send(&app, get("/price/ETHUSDT")).await;
    assert_eq!(body["price"], Value::Null);
    assert_eq!(state.feed.wanted_streams().await.len(), 2);

    state.feed.disconnect();
}

#[tokio::test]
async fn price_rejects_symbols_outside_the_stream_alphabet() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _, app) = setup(&dir, false).await;

    for uri in ["/price/btc%20usdt", "/price/btc%2Fusdt", "/price/btc%3Fx", "/price/BTC-USDT"] {
        let (status, body) = send(&app, get(uri)).await;
        assert_eq!(status, 400, "{}", uri);
        assert_eq!(body["ok"], false);
    }
    let (status, _) = send(&app, get(&format!("/price/{}", "A".repeat(21)))).await;
    assert_eq!(status, 400);

    assert!(state.feed.wanted_streams().await.is_empty());
    assert!(state.feed.connection_url().await.ends_with("/ws/heartbeat"));

    state.feed.disconnect();
}

#[tokio::test]
async fn debug_routes_are_hidden_when_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, app) = setup(&dir, false).await;

    for uri in ["/debug", "/debug-url", "/my-ip"] {
        let (status, body) = send(&app, get(uri)).await;
        assert_eq!(status, 404, "{}", uri);
        assert_eq!(body, Value::Null);
    }
    for uri in ["/debug-sign", "/generate-signature"] {
        let request = post_json(uri, json!({"binanceApiKey": "a", "binanceApiSecret": "b"}));
        let (status, _) = send(&app, request).await;
        assert_eq!(status, 404, "{}", uri);
    }
}

#[tokio::test]
async fn debug_env_reports_lengths_only() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, app) = setup(&dir, true).await;

    let (status, body) = send(&app, get("/debug")).await;
    assert_eq!(status, 200);
    assert_eq!(body["env"]["hasKey"], true);
    assert_eq!(body["env"]["keyLen"], 3);
    assert_eq!(body["env"]["secretLen"], 6);
    assert_eq!(body["feed"]["status"], "DISCONNECTED");
    assert!(!body.to_string().contains("secret\""));
}

#[tokio::test]
async fn debug_url_and_sign() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, app) = setup(&dir, true).await;

    let (status, body) = send(&app, get("/debug-url")).await;
    assert_eq!(status, 200);
    assert_eq!(
        body["fullUrl"],
        "https://api.3commas.io/public/api/ver1/accounts/new"
    );
    assert_eq!(body["path"], ACCOUNTS_NEW_PATH);

    let request = post_json(
        "/debug-sign",
        json!({"binanceApiKey": "bk", "binanceApiSecret": "bs"}),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, 200);
    let expected = sign(
        ACCOUNTS_NEW_PATH,
        CreateAccountRequest {
            binance_api_key: "bk".to_string(),
            binance_api_secret: "bs".to_string(),
            name: None,
        }
        .payload(),
        "secret",
    )
    .unwrap();
    assert_eq!(body["data"]["signature"], expected.signature);
    assert_eq!(body["data"]["bodyString"], expected.body);
    assert_eq!(body["data"]["headerLens"]["APIKEY"], 3);
}

#[tokio::test]
async fn generate_signature_describes_ready_request() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, app) = setup(&dir, true).await;

    let request = post_json(
        "/generate-signature",
        json!({"binanceApiKey": "bk", "binanceApiSecret": "bs", "name": "Main"}),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, 200);
    assert_eq!(body["request"]["method"], "POST");
    assert_eq!(body["request"]["headers"]["APIKEY"], "key");
    assert_eq!(body["request"]["body"]["urlencoded"][1], json!({"key": "name", "value": "Main"}));

    let signed_string = body["debug"]["signedString"].as_str().unwrap();
    assert_eq!(
        signed_string,
        format!("{}?{}", ACCOUNTS_NEW_PATH, body["debug"]["bodyString"].as_str().unwrap())
    );
    assert_eq!(body["debug"]["signatureLength"], 64);

    let missing = post_json("/generate-signature", json!({"binanceApiKey": "bk"}));
    let (status, _) = send(&app, missing).await;
    assert_eq!(status, 400);
}
