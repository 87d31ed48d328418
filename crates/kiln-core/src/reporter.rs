//! Status reporting to the remote API.
//!
//! Every outbound report is best-effort: a failed send is logged and dropped,
//! never retried and never propagated to the pipeline.

use async_trait::async_trait;
use kiln_training::{EpochMetrics, Identifier, JobRoute, ProgressEvent, ProgressSink};
use serde::Serialize;
use tracing::{debug, warn};

/// Routing for a status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Informational, non-terminal.
    Log,
    /// Terminal; sent exactly once per job.
    Reply,
}

impl ReportKind {
    #[must_use]
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Reply => "reply",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub kind: ReportKind,
    pub status_code: u16,
    pub message: String,
    pub train_id: Identifier,
}

impl StatusReport {
    pub fn log(train_id: &Identifier, status_code: u16, message: impl Into<String>) -> Self {
        Self { kind: ReportKind::Log, status_code, message: message.into(), train_id: train_id.clone() }
    }

    pub fn reply(train_id: &Identifier, status_code: u16, message: impl Into<String>) -> Self {
        Self { kind: ReportKind::Reply, status_code, message: message.into(), train_id: train_id.clone() }
    }
}

#[derive(Serialize)]
struct ReportBody<'a> {
    status_code: u16,
    msg: &'a str,
    train_id: &'a Identifier,
}

#[derive(Serialize)]
struct EpochBody<'a> {
    data: &'a EpochMetrics,
}

/// The only outward channel for job progress and outcomes.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Deliver a report. Never fails from the caller's point of view.
    async fn send(&self, route: &JobRoute, report: &StatusReport);

    /// A progress sink for the fit loop that pushes epoch metrics to the
    /// same destination.
    fn progress_sink(&self, route: &JobRoute) -> Box<dyn ProgressSink>;
}

/// Posts reports to `<base>/api/project/<project_no>/train/<train_id>/{log|reply}`.
#[derive(Debug, Clone)]
pub struct HttpStatusReporter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusReporter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    fn route_url(&self, route: &JobRoute, segment: &str) -> String {
        format!(
            "{}/api/project/{}/train/{}/{}",
            self.base_url,
            urlencoding::encode(&route.project_no.to_string()),
            urlencoding::encode(&route.train_id.to_string()),
            segment
        )
    }
}

async fn post_json<T: Serialize + Sync>(client: &reqwest::Client, url: &str, train_id: &Identifier, body: &T) {
    let result = client.post(url).header("train_id", train_id.to_string()).json(body).send().await;
    match result {
        Ok(response) if response.status().is_success() => {
            debug!(url = %url, status = %response.status(), "status report delivered");
        }
        Ok(response) => warn!(url = %url, status = %response.status(), "status API rejected report"),
        Err(e) => warn!(url = %url, error = %e, "failed to send status report"),
    }
}

#[async_trait]
impl StatusSink for HttpStatusReporter {
    async fn send(&self, route: &JobRoute, report: &StatusReport) {
        let url = self.route_url(route, report.kind.path_segment());
        let body = ReportBody { status_code: report.status_code, msg: &report.message, train_id: &report.train_id };
        post_json(&self.client, &url, &report.train_id, &body).await;
    }

    fn progress_sink(&self, route: &JobRoute) -> Box<dyn ProgressSink> {
        Box::new(HttpProgressSink {
            client: self.client.clone(),
            url: self.route_url(route, "epoch"),
            train_id: route.train_id.clone(),
        })
    }
}

/// Pushes `{"data": <metrics>}` for every finished epoch.
#[derive(Debug, Clone)]
pub struct HttpProgressSink {
    client: reqwest::Client,
    url: String,
    train_id: Identifier,
}

#[async_trait]
impl ProgressSink for HttpProgressSink {
    async fn on_event(&self, event: ProgressEvent) {
        if let ProgressEvent::Epoch { metrics, .. } = event {
            post_json(&self.client, &self.url, &self.train_id, &EpochBody { data: &metrics }).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn route() -> JobRoute {
        JobRoute { project_no: Identifier::Number(3), train_id: Identifier::Number(7) }
    }

    #[tokio::test]
    async fn test_reply_posts_to_reply_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/project/3/train/7/reply")
            .match_header("train_id", "7")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({
                "status_code": 200,
                "msg": "Train finished successfully.",
                "train_id": 7
            })))
            .with_status(200)
            .create_async()
            .await;

        let reporter = HttpStatusReporter::new(reqwest::Client::new(), server.url());
        let report = StatusReport::reply(&Identifier::Number(7), 200, "Train finished successfully.");
        reporter.send(&route(), &report).await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_log_posts_to_log_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/project/3/train/7/log")
            .match_body(Matcher::PartialJson(json!({"msg": "start loading dataset..."})))
            .with_status(200)
            .create_async()
            .await;

        let reporter = HttpStatusReporter::new(reqwest::Client::new(), format!("{}/", server.url()));
        reporter.send(&route(), &StatusReport::log(&Identifier::Number(7), 200, "start loading dataset...")).await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_failures_are_swallowed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", Matcher::Any).with_status(503).create_async().await;
        let reporter = HttpStatusReporter::new(reqwest::Client::new(), server.url());
        reporter.send(&route(), &StatusReport::reply(&Identifier::Number(7), 500, "OS error")).await;
        mock.assert_async().await;

        let unreachable = HttpStatusReporter::new(reqwest::Client::new(), "http://127.0.0.1:1");
        unreachable.send(&route(), &StatusReport::reply(&Identifier::Number(7), 500, "OS error")).await;
    }

    #[tokio::test]
    async fn test_progress_sink_pushes_only_epochs() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/project/3/train/7/epoch")
            .match_header("train_id", "7")
            .match_body(Matcher::Json(json!({"data": {"epoch": 0, "loss": 0.5, "lr": 0.001}})))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let reporter = HttpStatusReporter::new(reqwest::Client::new(), server.url());
        let sink = reporter.progress_sink(&route());
        sink.on_event(ProgressEvent::Started { train_id: Identifier::Number(7), epochs: 1 }).await;
        sink.on_event(ProgressEvent::Epoch {
            train_id: Identifier::Number(7),
            metrics: EpochMetrics { epoch: 0, loss: 0.5, val_loss: None, lr: 0.001 },
        })
        .await;
        sink.on_event(ProgressEvent::Finished { train_id: Identifier::Number(7) }).await;

        mock.assert_async().await;
    }
}
