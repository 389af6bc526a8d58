//! HTTP gateway to the orchestrator's monitoring API.
//!
//! Fire-and-confirm: commands are sent as-is and nothing is applied locally.
//! The next tree poll shows their effect.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::{ClientError, Result};
use tmon_core::{HistoryFilter, HistoryStats, SessionRecord, TaskId, TaskRecord};
use tmon_protocol::{
    Endpoint, HistoryPageResponse, HttpMethod, RawHistoryStats, StopRequest, TaskStats,
    TreeResponse,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Stop reason recorded by [`TaskGateway::restart_task`].
pub const RESTART_REASON: &str = "Restart";

// ============================================================================
// Source Traits
// ============================================================================

/// Anything that can produce a hierarchy snapshot.
#[async_trait]
pub trait TreeSource: Send + Sync {
    /// Returns the root of the current hierarchy, `None` when empty.
    async fn fetch_tree(&self) -> Result<Option<TaskRecord>>;
}

/// Anything that can answer history queries.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn query_history(&self, filter: &HistoryFilter) -> Result<HistoryPageResponse>;

    async fn session_info(&self) -> Result<SessionRecord>;
}

// ============================================================================
// Gateway
// ============================================================================

/// reqwest-backed client for every remote operation.
#[derive(Debug, Clone)]
pub struct TaskGateway {
    http: Client,
    base_url: Url,
    timeout: Duration,
}

impl TaskGateway {
    /// Creates a gateway for `base_url` (e.g. `http://localhost:8082/api`).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url).map_err(|e| ClientError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "not a hierarchical URL".to_string(),
            });
        }
        // `Url::join` replaces the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self {
            http,
            base_url: base,
            timeout,
        })
    }

    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        Self::new(&config.base_url, config.timeout())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn request(&self, endpoint: &Endpoint) -> Result<RequestBuilder> {
        let path = endpoint.path();
        let url = self
            .base_url
            .join(&path)
            .map_err(|e| ClientError::InvalidBaseUrl {
                url: format!("{}{path}", self.base_url),
                reason: e.to_string(),
            })?;
        let method = match endpoint.method() {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        Ok(self.http.request(method, url))
    }

    /// Sends the request and returns the body of a 2xx response.
    async fn execute(&self, endpoint: Endpoint, builder: RequestBuilder) -> Result<String> {
        debug!(
            method = endpoint.method().as_str(),
            path = %endpoint.path(),
            "Sending request"
        );

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::from_transport(e, self.timeout))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::from_transport(e, self.timeout))?;

        if status.is_success() {
            return Ok(body);
        }

        if let Endpoint::GetTask(id) | Endpoint::StopTask(id) = endpoint {
            // Stop answers 400 "task not found" rather than 404.
            let not_found = status == StatusCode::NOT_FOUND
                || (status == StatusCode::BAD_REQUEST
                    && body.to_ascii_lowercase().contains("not found"));
            if not_found {
                return Err(ClientError::TaskNotFound(id));
            }
        }

        warn!(
            status = status.as_u16(),
            path = %endpoint.path(),
            "Orchestrator rejected request"
        );
        Err(ClientError::Status {
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: Endpoint) -> Result<T> {
        let builder = self.request(&endpoint)?;
        let body = self.execute(endpoint, builder).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// `GET /tasks/tree`.
    pub async fn fetch_tree(&self) -> Result<Option<TaskRecord>> {
        let endpoint = Endpoint::TaskTree;
        let builder = self.request(&endpoint)?;
        let body = self.execute(endpoint, builder).await?;
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(None);
        }
        Ok(serde_json::from_str::<TreeResponse>(trimmed)?.into_root())
    }

    /// `GET /tasks`.
    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>> {
        let tasks: Option<Vec<TaskRecord>> = self.get_json(Endpoint::ListTasks).await?;
        Ok(tasks.unwrap_or_default())
    }

    /// `GET /tasks/{id}`.
    pub async fn get_task(&self, id: TaskId) -> Result<TaskRecord> {
        self.get_json(Endpoint::GetTask(id)).await
    }

    /// `POST /tasks/{id}/stop`.
    ///
    /// Sent whatever the locally known state; the orchestrator decides.
    pub async fn stop_task(&self, id: TaskId, reason: Option<String>) -> Result<()> {
        let endpoint = Endpoint::StopTask(id);
        let builder = self.request(&endpoint)?.json(&StopRequest::new(reason));
        self.execute(endpoint, builder).await?;
        info!(task_id = %id, "Stop request accepted");
        Ok(())
    }

    /// `POST /tasks`: asks the orchestrator to spawn its demonstration tasks.
    pub async fn create_demo_task(&self) -> Result<()> {
        let endpoint = Endpoint::CreateDemoTask;
        let builder = self.request(&endpoint)?;
        self.execute(endpoint, builder).await?;
        info!("Demo task creation accepted");
        Ok(())
    }

    /// Stops `id` with [`RESTART_REASON`], then asks for a fresh demo task.
    ///
    /// The remote has no restart operation. Nothing is created when the
    /// stop is rejected.
    pub async fn restart_task(&self, id: TaskId) -> Result<()> {
        self.stop_task(id, Some(RESTART_REASON.to_string())).await?;
        self.create_demo_task().await?;
        info!(task_id = %id, "Restart requested");
        Ok(())
    }

    /// `GET /tasks/history` with the filter as query parameters.
    pub async fn query_history(&self, filter: &HistoryFilter) -> Result<HistoryPageResponse> {
        let endpoint = Endpoint::History;
        let builder = self.request(&endpoint)?.query(filter);
        let body = self.execute(endpoint, builder).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// `GET /tasks/history/stats`, aggregated remotely over the current session.
    pub async fn history_stats(&self) -> Result<HistoryStats> {
        let raw: RawHistoryStats = self.get_json(Endpoint::HistoryStats).await?;
        Ok(raw.into_stats()?)
    }

    /// `GET /session`.
    pub async fn session_info(&self) -> Result<SessionRecord> {
        self.get_json(Endpoint::Session).await
    }

    /// `GET /tasks/stats`.
    pub async fn task_stats(&self) -> Result<TaskStats> {
        self.get_json(Endpoint::TaskStats).await
    }
}

#[async_trait]
impl TreeSource for TaskGateway {
    async fn fetch_tree(&self) -> Result<Option<TaskRecord>> {
        TaskGateway::fetch_tree(self).await
    }
}

#[async_trait]
impl HistorySource for TaskGateway {
    async fn query_history(&self, filter: &HistoryFilter) -> Result<HistoryPageResponse> {
        TaskGateway::query_history(self, filter).await
    }

    async fn session_info(&self) -> Result<SessionRecord> {
        TaskGateway::session_info(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmon_core::{TaskState, TaskType};
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> TaskGateway {
        TaskGateway::new(&format!("{}/api", server.uri()), Duration::from_secs(5)).unwrap()
    }

    const TREE: &str = r#"{
        "id": 1, "type": 1, "owner": "RootManager", "state": 3,
        "startTime": "2024-01-15T10:00:00Z",
        "children": [
            {"id": 3, "type": 0, "owner": "DemoTask", "state": 3, "parentId": 1,
             "startTime": "2024-01-15T10:00:02Z"},
            {"id": 2, "type": 0, "owner": "DemoTask", "state": 6, "parentId": 1,
             "startTime": "2024-01-15T10:00:01Z", "stopReason": "task complete"}
        ]
    }"#;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let gw = TaskGateway::new("http://localhost:8082/api", Duration::from_secs(5)).unwrap();
        assert_eq!(gw.base_url().as_str(), "http://localhost:8082/api/");
        assert_eq!(
            gw.base_url().join("tasks/tree").unwrap().as_str(),
            "http://localhost:8082/api/tasks/tree"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = TaskGateway::new("not a url", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ClientError::InvalidBaseUrl { .. }));
    }

    #[tokio::test]
    async fn test_fetch_tree_bare_root() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tasks/tree"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(TREE, "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        let root = gateway(&server).fetch_tree().await.unwrap().unwrap();
        assert_eq!(root.id, TaskId::new(1));
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.task_type, TaskType::Job);
    }

    #[tokio::test]
    async fn test_fetch_tree_wrapped_null_root() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tasks/tree"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(r#"{"root": null}"#, "application/json"),
            )
            .mount(&server)
            .await;

        assert!(gateway(&server).fetch_tree().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_tree_error_object_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tasks/tree"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(r#"{"error": "x"}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let err = gateway(&server).fetch_tree().await.unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_fetch_tree_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tasks/tree"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = gateway(&server).fetch_tree().await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tasks/tree"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(TREE, "application/json")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let gw = TaskGateway::new(&format!("{}/api", server.uri()), Duration::from_millis(100))
            .unwrap();
        let err = gw.fetch_tree().await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_get_task_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tasks/99"))
            .respond_with(ResponseTemplate::new(404).set_body_string("404 page not found"))
            .mount(&server)
            .await;

        let err = gateway(&server).get_task(TaskId::new(99)).await.unwrap_err();
        assert!(matches!(err, ClientError::TaskNotFound(id) if id == TaskId::new(99)));
    }

    #[tokio::test]
    async fn test_stop_task_sends_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/tasks/7/stop"))
            .and(body_json(serde_json::json!({"reason": "operator request"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"message":"Task stopped"}"#, "application/json"),
            )
            .expect(1)
            .mount(&server)
            .await;

        gateway(&server)
            .stop_task(TaskId::new(7), Some("operator request".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_unknown_task_bad_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/tasks/8/stop"))
            .and(body_json(serde_json::json!({})))
            .respond_with(ResponseTemplate::new(400).set_body_string("task not found\n"))
            .mount(&server)
            .await;

        let err = gateway(&server).stop_task(TaskId::new(8), None).await.unwrap_err();
        assert!(matches!(err, ClientError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn test_restart_stops_then_creates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/tasks/7/stop"))
            .and(body_json(serde_json::json!({"reason": "Restart"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/tasks"))
            .respond_with(ResponseTemplate::new(201).set_body_raw("{}", "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        gateway(&server).restart_task(TaskId::new(7)).await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_of_unknown_task_creates_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/tasks/9/stop"))
            .respond_with(ResponseTemplate::new(400).set_body_string("task not found"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/tasks"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let err = gateway(&server).restart_task(TaskId::new(9)).await.unwrap_err();
        assert!(matches!(err, ClientError::TaskNotFound(id) if id == TaskId::new(9)));
    }

    #[tokio::test]
    async fn test_create_demo_task() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/tasks"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_raw(r#"{"message":"Demo tasks created"}"#, "application/json"),
            )
            .expect(1)
            .mount(&server)
            .await;

        gateway(&server).create_demo_task().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_history_sends_filter_params() {
        let server = MockServer::start().await;
        let body = r#"{
            "tasks": [{
                "taskId": 4, "sessionId": "s1", "type": 0, "ownerType": "DemoTask",
                "startTime": "2024-01-15T10:00:00Z", "endTime": "2024-01-15T10:00:03Z",
                "duration": 3000, "state": 6, "stopReason": "task complete",
                "retryCount": 0, "descriptions": "{}", "maxRetry": 0, "level": 1
            }],
            "total": 1, "page": 1, "pageSize": 20, "totalPages": 1
        }"#;
        Mock::given(method("GET"))
            .and(path("/api/tasks/history"))
            .and(query_param("ownerType", "DemoTask"))
            .and(query_param("sessionId", "s1"))
            .and(query_param("limit", "20"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        let filter = HistoryFilter::new()
            .owner_type("DemoTask")
            .session(tmon_core::SessionId::new("s1"))
            .page(20, 0);
        let page = gateway(&server).query_history(&filter).await.unwrap();
        assert_eq!(page.records().len(), 1);
        assert_eq!(page.records()[0].state, TaskState::Disposed);
        assert_eq!(page.total, Some(1));
    }

    #[tokio::test]
    async fn test_history_stats_parses_go_durations() {
        let server = MockServer::start().await;
        let body = r#"{"totalTasks": 2, "sessionId": "s1", "totalDuration": "1m0.5s",
                       "averageDuration": "30.25s", "ownerTypeStats": {"DemoTask": 2}}"#;
        Mock::given(method("GET"))
            .and(path("/api/tasks/history/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
            .mount(&server)
            .await;

        let stats = gateway(&server).history_stats().await.unwrap();
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.total_duration.as_millis(), 60_500);
        assert_eq!(stats.average_duration.as_millis(), 30_250);
    }

    #[tokio::test]
    async fn test_session_and_task_stats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/session"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"id": "20240115-100000-abcd1234", "startTime": "2024-01-15T10:00:00Z",
                    "pid": 4242, "args": "./server"}"#,
                "application/json",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/tasks/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"totalTasks": 5, "runningTasks": 3, "completedTasks": 1,
                    "failedTasks": 1, "retryCount": 0}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let gw = gateway(&server);
        let session = gw.session_info().await.unwrap();
        assert_eq!(session.id.as_str(), "20240115-100000-abcd1234");
        assert_eq!(session.pid, 4242);

        let stats = gw.task_stats().await.unwrap();
        assert_eq!(stats.running_tasks, 3);
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html>", "text/html"))
            .mount(&server)
            .await;

        let err = gateway(&server).list_tasks().await.unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }
}
