use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use innsight_api::app::{build_router, AppServices};
use innsight_api::config::AppConfig;
use innsight_infra::kpi::{InMemoryKpiSource, KpiDefinition};
use reqwest::StatusCode;
use serde_json::Value;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(services: AppServices) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let app = build_router(Arc::new(services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn config(domains: &str) -> AppConfig {
    AppConfig {
        kpi_definitions: KpiDefinition::parse_list(domains).unwrap(),
        batch_schedule: None,
        ..AppConfig::default()
    }
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Source with revenue and occupancy facts for March 2024 and today.
fn seeded_source() -> InMemoryKpiSource {
    let source = InMemoryKpiSource::new();
    for d in 1..=31 {
        source.record("revenue", day(2024, 3, d), 100.0);
        source.record("occupancy", day(2024, 3, d), if d % 2 == 0 { 80.0 } else { 60.0 });
    }
    let today = Utc::now().date_naive();
    source.record("revenue", today, 250.0);
    source.record("occupancy", today, 90.0);
    source
}

async fn spawn_default() -> (TestServer, Arc<InMemoryKpiSource>) {
    let source = Arc::new(seeded_source());
    let services = AppServices::with_source(
        &config("revenue:day:sum,revenue:month:sum,occupancy:month:mean"),
        source.clone(),
    );
    (TestServer::spawn(services).await, source)
}

async fn wait_terminal(client: &reqwest::Client, srv: &TestServer, job_id: &str) -> Value {
    for _ in 0..200 {
        let res = client
            .get(srv.url(&format!("/jobs/{job_id}")))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        if body["status"] == "completed" || body["status"] == "failed" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not finish within timeout");
}

#[tokio::test]
async fn health_is_ok() {
    let (srv, _) = spawn_default().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn background_batch_runs_to_completion() {
    let (srv, _) = spawn_default().await;
    let client = reqwest::Client::new();

    let res = client.post(srv.url("/jobs")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let started: Value = res.json().await.unwrap();
    assert_eq!(started["totalUnits"], 3);
    assert!(started["startedAt"].is_string());
    let job_id = started["jobId"].as_str().unwrap().to_string();

    let record = wait_terminal(&client, &srv, &job_id).await;
    assert_eq!(record["jobId"], job_id.as_str());
    assert_eq!(record["status"], "completed");
    assert_eq!(record["progress"], 100);
    assert!(record["completedAt"].is_string());

    let units = record["unitResults"].as_array().unwrap();
    let names: Vec<_> = units.iter().map(|u| u["name"].as_str().unwrap()).collect();
    assert_eq!(
        names,
        vec!["kpi:revenue:day", "kpi:revenue:month", "kpi:occupancy:month"]
    );
    assert!(units.iter().all(|u| u["outcome"] == "success"));
}

#[tokio::test]
async fn second_batch_is_rejected_while_one_runs() {
    let source = Arc::new(seeded_source().with_latency(Duration::from_millis(150)));
    let services = AppServices::with_source(&config("revenue:day,revenue:month,revenue:week"), source);
    let srv = TestServer::spawn(services).await;
    let client = reqwest::Client::new();

    let res = client.post(srv.url("/jobs")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let job_id = res.json::<Value>().await.unwrap()["jobId"]
        .as_str()
        .unwrap()
        .to_string();

    let res = client.post(srv.url("/jobs")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "already_running");

    let res = client.post(srv.url("/jobs/run-sync")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let listing: Value = client
        .get(srv.url("/jobs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["running"], true);
    assert_eq!(listing["jobs"].as_array().unwrap().len(), 1);

    let record = wait_terminal(&client, &srv, &job_id).await;
    assert_eq!(record["status"], "completed");
}

#[tokio::test]
async fn run_sync_returns_the_finished_record() {
    let (srv, _) = spawn_default().await;
    let client = reqwest::Client::new();

    let res = client.post(srv.url("/jobs/run-sync")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let record: Value = res.json().await.unwrap();
    assert_eq!(record["status"], "completed");
    assert_eq!(record["unitResults"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn failing_unit_is_reported_without_failing_the_batch() {
    // `spa` is configured but the source has no such domain.
    let source = Arc::new(seeded_source());
    let services = AppServices::with_source(&config("revenue:day,spa:day,occupancy:day:mean"), source);
    let srv = TestServer::spawn(services).await;
    let client = reqwest::Client::new();

    let record: Value = client
        .post(srv.url("/jobs/run-sync"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(record["status"], "completed");
    assert!(record.get("error").is_none());
    let units = record["unitResults"].as_array().unwrap();
    assert_eq!(units[0]["outcome"], "success");
    assert_eq!(units[1]["outcome"], "failed");
    assert!(units[1]["error"].as_str().unwrap().contains("spa"));
    assert_eq!(units[2]["outcome"], "success");
}

#[tokio::test]
async fn job_lookup_errors() {
    let (srv, _) = spawn_default().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/jobs/not-a-uuid")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_job_id");

    let unknown = "01890a5d-ac96-774b-bcce-b302099a8057";
    let res = client.get(srv.url(&format!("/jobs/{unknown}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "job_not_found");
}

#[tokio::test]
async fn kpi_reads_are_cached() {
    let (srv, source) = spawn_default().await;
    let client = reqwest::Client::new();
    let url = srv.url("/kpis/revenue?period=month&start=2024-03-01&end=2024-03-31");

    let first: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(first["domain"], "revenue");
    assert_eq!(first["period"], "month");
    assert_eq!(first["start"], "2024-03-01");
    assert_eq!(first["end"], "2024-03-31");
    assert_eq!(first["value"], 3100.0);
    assert_eq!(first["sampleDays"], 31);
    assert_eq!(first["cached"], false);

    let second: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(second["cached"], true);
    assert_eq!(second["computedAt"], first["computedAt"]);
    assert_eq!(source.calls(), 1);

    let stats: Value = client
        .get(srv.url("/cache/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["entries"], 1);
    assert_eq!(stats["hits"], 1);
    assert_eq!(stats["misses"], 1);
    assert_eq!(stats["inFlight"], 0);
}

#[tokio::test]
async fn concurrent_kpi_reads_share_one_computation() {
    let source = Arc::new(seeded_source().with_latency(Duration::from_millis(300)));
    let services = AppServices::with_source(&config("occupancy:month:mean"), source.clone());
    let srv = TestServer::spawn(services).await;
    let client = reqwest::Client::new();
    // 15 days at 80 and 15 at 60.
    let url = srv.url("/kpis/occupancy?period=month&start=2024-03-01&end=2024-03-30");

    let requests = (0..8).map(|_| {
        let client = client.clone();
        let url = url.clone();
        async move { client.get(&url).send().await.unwrap().json::<Value>().await.unwrap() }
    });
    let bodies: Vec<Value> = spawn_all(requests).await;

    assert_eq!(source.calls(), 1);
    assert!(bodies.iter().all(|b| b["value"] == 70.0));
    assert_eq!(bodies.iter().filter(|b| b["cached"] == false).count(), 1);
}

/// Run the requests as concurrent tasks and collect their bodies in order.
async fn spawn_all<F, T>(futures: impl Iterator<Item = F>) -> Vec<T>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<_> = futures.map(tokio::spawn).collect();
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        out.push(handle.await.unwrap());
    }
    out
}

#[tokio::test]
async fn kpi_request_errors() {
    let (srv, _) = spawn_default().await;
    let client = reqwest::Client::new();

    let cases = [
        ("/kpis/spa?period=day", StatusCode::NOT_FOUND, "kpi_not_found"),
        ("/kpis/revenue?period=year", StatusCode::NOT_FOUND, "kpi_not_found"),
        ("/kpis/revenue?period=fortnight", StatusCode::BAD_REQUEST, "invalid_period"),
        ("/kpis/revenue", StatusCode::BAD_REQUEST, "invalid_query"),
        (
            "/kpis/revenue?period=month&start=2024-03-31&end=2024-03-01",
            StatusCode::BAD_REQUEST,
            "invalid_range",
        ),
    ];
    for (path, status, code) in cases {
        let res = client.get(srv.url(path)).send().await.unwrap();
        assert_eq!(res.status(), status, "{path}");
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["error"], code, "{path}");
    }
}

#[tokio::test]
async fn kpi_source_failure_is_a_bad_gateway() {
    let source = Arc::new(InMemoryKpiSource::new());
    let services = AppServices::with_source(&config("adr:month:mean"), source);
    let srv = TestServer::spawn(services).await;

    let res = reqwest::get(srv.url("/kpis/adr?period=month")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "kpi_source_error");
}

#[tokio::test]
async fn batch_warms_the_cache_and_invalidation_clears_it() {
    let (srv, source) = spawn_default().await;
    let client = reqwest::Client::new();

    let res = client.post(srv.url("/jobs/run-sync")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let calls_after_batch = source.calls();

    // Current-month window, precomputed by the batch.
    let body: Value = client
        .get(srv.url("/kpis/revenue?period=month"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["cached"], true);
    assert_eq!(source.calls(), calls_after_batch);

    let res = client.delete(srv.url("/cache/revenue")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cleared: Value = res.json().await.unwrap();
    assert_eq!(cleared["domain"], "revenue");
    assert_eq!(cleared["removed"], 2);

    let res = client.delete(srv.url("/cache")).send().await.unwrap();
    let cleared: Value = res.json().await.unwrap();
    assert_eq!(cleared["removed"], 1);

    let body: Value = client
        .get(srv.url("/kpis/revenue?period=month"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["cached"], false);
}

#[tokio::test]
async fn job_listing_is_newest_first() {
    let (srv, _) = spawn_default().await;
    let client = reqwest::Client::new();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let record: Value = client
            .post(srv.url("/jobs/run-sync"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        ids.push(record["jobId"].as_str().unwrap().to_string());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let listing: Value = client
        .get(srv.url("/jobs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let listed: Vec<_> = listing["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["jobId"].as_str().unwrap().to_string())
        .collect();
    ids.reverse();
    assert_eq!(listed, ids);
}
