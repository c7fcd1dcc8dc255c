use beancount_api_web::Settings;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const LEDGER: &str = r#"
option "title" "Test Ledger"
option "operating_currency" "USD"

2024-01-01 open Assets:Checking USD
2024-01-01 open Expenses:Groceries
2024-01-01 open Expenses:Home

2024-01-10 * "Home Depot" "Paint"
    Assets:Checking  -30.00 USD
    Expenses:Home

2024-01-15 * "John" "For groceries"
    Assets:Checking  -50.00 USD
    Expenses:Groceries

2024-02-01 balance Assets:Checking  -80.00 USD
"#;

fn ledger_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "beancount-api-web-{name}-{}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("main.beancount"), LEDGER).unwrap();
    dir
}

fn settings(work_dir: &Path) -> Settings {
    Settings {
        work_dir: work_dir.to_owned(),
        cache_interval: 1,
        watch: false,
        ..Settings::default()
    }
}

struct Server {
    base: String,
    shutdown: CancellationToken,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start(settings: Settings) -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/api/v1", listener.local_addr().unwrap());
    let shutdown = CancellationToken::new();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(error) = beancount_api_web::serve(listener, settings, shutdown).await {
                panic!("server failed: {error:#}");
            }
        }
    });

    Server { base, shutdown }
}

async fn get_json(client: &reqwest::Client, url: String) -> serde_json::Value {
    let response = client.get(&url).send().await.expect("request failed");
    assert!(
        response.status().is_success(),
        "{url} returned {}",
        response.status()
    );
    response.json().await.expect("json parse failed")
}

#[tokio::test]
async fn test_api_workflow() {
    let dir = ledger_dir("workflow");
    let server = start(settings(&dir)).await;
    let base = &server.base;
    let client = reqwest::Client::new();

    // Accounts
    let accounts = get_json(&client, format!("{base}/account")).await;
    let names: Vec<_> = accounts.as_object().unwrap().keys().cloned().collect();
    assert_eq!(
        names,
        ["Assets:Checking", "Expenses:Groceries", "Expenses:Home"]
    );

    let account = get_json(&client, format!("{base}/account/Assets:Checking")).await;
    assert_eq!(account["open"], "2024-01-01");
    assert_eq!(account["transactions"].as_array().unwrap().len(), 2);

    let balance = get_json(&client, format!("{base}/account/Assets:Checking/balance")).await;
    assert_eq!(balance["USD"][0]["units"]["number"].as_f64(), Some(-80.0));
    assert_eq!(balance["USD"][0]["units"]["currency"], "USD");

    let missing = client
        .get(format!("{base}/account/Assets:Savings"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);
    let body: serde_json::Value = missing.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Assets:Savings"));

    let transactions = get_json(
        &client,
        format!("{base}/account/Assets:Checking/transactions?search=depot"),
    )
    .await;
    let transactions = transactions.as_array().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0]["payee"], "Home Depot");

    // Directives
    let directives = get_json(&client, format!("{base}/directive")).await;
    assert_eq!(directives.as_array().unwrap().len(), 6);

    let opens = get_json(
        &client,
        format!("{base}/directive?filter=[?ty == 'Open']"),
    )
    .await;
    assert_eq!(opens.as_array().unwrap().len(), 3);

    let filtered = get_json(
        &client,
        format!("{base}/directive?filter=[?ty == 'Transaction']&search=groceries&priority=search"),
    )
    .await;
    assert_eq!(filtered.as_array().unwrap().len(), 1);
    assert_eq!(filtered[0]["narration"], "For groceries");

    let balances = get_json(&client, format!("{base}/directive/balance")).await;
    assert_eq!(balances.as_array().unwrap().len(), 1);

    let unknown = client
        .get(format!("{base}/directive/posting"))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status().as_u16(), 400);

    let bad_filter = client
        .get(format!("{base}/directive?filter=[?ty =="))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_filter.status().as_u16(), 400);
    let body: serde_json::Value = bad_filter.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("[?ty =="));

    // Lookup by id
    let id = directives[0]["id"].as_str().unwrap();
    let directive = get_json(&client, format!("{base}/directive/id/{id}")).await;
    assert_eq!(directive, directives[0]);

    let missing = client
        .get(format!("{base}/directive/id/0000"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);

    // Syntax
    let syntax: String = client
        .post(format!("{base}/directive/syntax"))
        .json(&serde_json::json!({
            "ty": "Open",
            "date": "2022-01-01",
            "account": "Assets:Bank:Test",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(syntax, "2022-01-01 open Assets:Bank:Test\n");

    // File
    let file = get_json(&client, format!("{base}/file")).await;
    assert_eq!(file["entries"].as_array().unwrap().len(), 6);
    assert!(file["accounts"]["Expenses:Home"].is_object());

    let errors = get_json(&client, format!("{base}/file/errors")).await;
    assert_eq!(errors, serde_json::json!([]));

    let options = get_json(&client, format!("{base}/file/options")).await;
    assert_eq!(options["title"], "Test Ledger");

    // Query
    let result = get_json(
        &client,
        format!("{base}/query?expr=entries[?ty == 'Transaction'].payee"),
    )
    .await;
    assert_eq!(result, serde_json::json!(["Home Depot", "John"]));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_auth_token() {
    let dir = ledger_dir("auth");
    let server = start(Settings {
        auth_token: Some("secret".to_string()),
        ..settings(&dir)
    })
    .await;
    let client = reqwest::Client::new();

    let rejected = client
        .get(format!("{}/account", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status().as_u16(), 403);

    let rejected = client
        .get(format!("{}/account", server.base))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status().as_u16(), 403);

    let accepted = client
        .get(format!("{}/account", server.base))
        .bearer_auth("secret")
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status().as_u16(), 200);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_reload_on_change() {
    let dir = ledger_dir("reload");
    let server = start(settings(&dir)).await;
    let client = reqwest::Client::new();

    let events = client
        .get(format!("{}/events", server.base))
        .send()
        .await
        .expect("events request failed");
    assert_eq!(events.status().as_u16(), 200);
    let mut events = events.bytes_stream();

    std::fs::write(
        dir.join("main.beancount"),
        format!("{LEDGER}\n2024-03-01 open Assets:Savings\n"),
    )
    .unwrap();

    // the refresher checks once per second
    let received = tokio::time::timeout(Duration::from_secs(10), async {
        let mut buffer = String::new();
        while let Some(chunk) = events.next().await {
            buffer.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
            if buffer.contains("event: reload") {
                return buffer;
            }
        }
        buffer
    })
    .await
    .expect("no reload event received");
    assert!(received.contains("\"entries\":7"), "{received}");

    let account = get_json(&client, format!("{}/account/Assets:Savings", server.base)).await;
    assert_eq!(account["name"], "Assets:Savings");

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_missing_ledger_fails_startup() {
    let dir = std::env::temp_dir().join(format!("beancount-api-web-empty-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let result = beancount_api_web::serve(listener, settings(&dir), CancellationToken::new()).await;

    let error = result.expect_err("startup should fail without a ledger");
    assert!(format!("{error:#}").contains("Unable to locate beancount file"));

    let _ = std::fs::remove_dir_all(&dir);
}
