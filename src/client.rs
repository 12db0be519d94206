use anyhow::{Context, Result, anyhow, bail};
use reqwest::{Method, StatusCode};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::config::load_config;
use crate::error::ApiError;
use crate::invoke::Retrieve;
use crate::legacy::ApiReply;
use crate::processing::{ProcessingJob, ProcessingJobStatus, ProcessingResults};
use crate::request::RequestFields;
use crate::util::{
    api_v2_variant, append_query, backoff, retriable_status, split_key_basic,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base CDS API URL, typically `https://cds.climate.copernicus.eu/api`.
    pub url: String,
    /// API key, either legacy `<UID>:<APIKEY>` or a personal access token.
    pub key: String,
    /// Whether to verify TLS certificates.
    pub verify: bool,
}

/// Blocking CDS API client.
#[derive(Debug, Clone)]
pub struct Client {
    url: String,
    key: String,
    verify: bool,

    timeout: Duration,
    pub(crate) retry_max: usize,
    pub(crate) sleep_max: Duration,
    wait_until_complete: bool,
    pub(crate) progress: bool,

    pub(crate) http: HttpClient,
}

/// A finished result waiting on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Download URL.
    pub location: String,
    /// Expected content length (bytes).
    pub content_length: u64,
    pub content_type: Option<String>,
}

impl Client {
    /// Equivalent to `Client::new(None, None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit `url`/`key`/`verify` arguments
    /// - environment variables `CDSAPI_URL` / `CDSAPI_KEY`
    /// - config file from `CDSAPI_RC`, `./.cdsapirc` or `~/.cdsapirc`
    pub fn new(url: Option<String>, key: Option<String>, verify: Option<bool>) -> Result<Self> {
        Self::with_config(load_config(url, key, verify)?)
    }

    pub fn with_config(cfg: ClientConfig) -> Result<Self> {
        let timeout = Duration::from_secs(60);
        let http = build_http(cfg.verify, timeout)?;
        log::debug!("using CDS endpoint {}", cfg.url);

        Ok(Self {
            url: cfg.url,
            key: cfg.key,
            verify: cfg.verify,
            timeout,
            retry_max: 500,
            sleep_max: Duration::from_secs(120),
            wait_until_complete: true,
            progress: true,
            http,
        })
    }

    /// Per-request HTTP timeout. Rebuilds the underlying HTTP client.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = build_http(self.verify, timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    pub fn with_retry_max(mut self, retry_max: usize) -> Self {
        self.retry_max = retry_max.max(1);
        self
    }

    pub fn with_sleep_max(mut self, sleep_max: Duration) -> Self {
        self.sleep_max = sleep_max;
        self
    }

    pub fn with_wait_until_complete(mut self, wait: bool) -> Self {
        self.wait_until_complete = wait;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Submits a request and, when `target` is given, downloads the result.
    pub fn retrieve<T: Serialize>(
        &self,
        dataset: &str,
        request: &T,
        target: Option<&Path>,
    ) -> Result<RemoteFile> {
        // Legacy "<UID>:<APIKEY>" keys go through /resources + /tasks,
        // token-only keys through the Retrieve API (/retrieve/v1).
        if split_key_basic(&self.key).is_some() {
            return self.retrieve_legacy(dataset, request, target);
        }

        self.retrieve_processing(dataset, request, target)
    }

    fn retrieve_legacy<T: Serialize>(
        &self,
        dataset: &str,
        request: &T,
        target: Option<&Path>,
    ) -> Result<RemoteFile> {
        let (base_url, reply) = self.post_with_base_fallback(dataset, request)?;

        if !self.wait_until_complete {
            return match reply.outcome(&base_url)? {
                Some(file) => self.finish(file, target),
                None => bail!(
                    "request is {} (request_id={}); no result to download without waiting",
                    reply.state,
                    reply.request_id.as_deref().unwrap_or_default()
                ),
            };
        }

        let mut current = reply;
        let mut submitted = true;
        let file = self.poll_until_done("Request state", || {
            if !submitted {
                let rid = current.request_id.as_deref().ok_or_else(|| {
                    anyhow!("missing request_id while state={}", current.state)
                })?;
                let task_url = format!("{}/tasks/{}", base_url.trim_end_matches('/'), rid);
                current = self.get_json(&task_url)?;
            }
            submitted = false;
            let done = current.outcome(&base_url)?;
            Ok((current.state.clone(), done))
        })?;

        self.finish(file, target)
    }

    fn retrieve_processing<T: Serialize>(
        &self,
        dataset: &str,
        request: &T,
        target: Option<&Path>,
    ) -> Result<RemoteFile> {
        if !self.wait_until_complete {
            bail!(
                "wait_until_complete=false is not supported for token-only keys; set wait_until_complete=true"
            );
        }

        let retrieve_base = format!("{}/retrieve/v1", self.url.trim_end_matches('/'));
        let exec_url = format!("{}/processes/{}/execution", retrieve_base, dataset);

        let submit_body = serde_json::json!({ "inputs": request });
        let job: ProcessingJob = self.post_json(&exec_url, &submit_body)?;

        let monitor_url = job
            .monitor_url()
            .or_else(|| {
                job.job_id
                    .as_deref()
                    .map(|id| format!("{}/jobs/{}", retrieve_base, id))
            })
            .ok_or_else(|| anyhow!("missing monitor link in job submission response"))?;
        let status_url = append_query(&monitor_url, &[("log", "true"), ("request", "true")]);

        let results_url = self.poll_until_done("Job status", || {
            let status: ProcessingJobStatus = self.get_json(&status_url)?;
            let done = status.outcome(&monitor_url)?;
            Ok((status.status, done))
        })?;

        let results: ProcessingResults = self.get_json(&results_url)?;
        let file = results.to_remote_file(&results_url)?;
        self.finish(file, target)
    }

    /// Runs `step` until it yields a value, sleeping with backoff in between.
    ///
    /// `step` returns the server-side state name (logged on change) and the
    /// value once the job is done. Terminal failures come back as errors.
    fn poll_until_done<T>(
        &self,
        label: &str,
        mut step: impl FnMut() -> Result<(String, Option<T>)>,
    ) -> Result<T> {
        let mut sleep = Duration::from_secs(1).min(self.sleep_max);
        let mut last_state: Option<String> = None;

        loop {
            let (state, done) = step()?;
            if last_state.as_deref() != Some(state.as_str()) {
                log::info!("{}: {}", label, state);
                last_state = Some(state);
            }
            if let Some(value) = done {
                return Ok(value);
            }
            thread::sleep(sleep);
            sleep = backoff(sleep, self.sleep_max);
        }
    }

    fn finish(&self, file: RemoteFile, target: Option<&Path>) -> Result<RemoteFile> {
        if let Some(target) = target {
            self.download(&file, target)?;
        }
        Ok(file)
    }

    fn post_with_base_fallback<T: Serialize>(
        &self,
        dataset: &str,
        request: &T,
    ) -> Result<(String, ApiReply)> {
        let base = self.url.trim_end_matches('/').to_string();
        let url = format!("{}/resources/{}", base, dataset);

        match self.post_json::<T, ApiReply>(&url, request) {
            Ok(reply) => Ok((base, reply)),
            Err(e) => {
                // Some deployments only serve the legacy API under /api/v2.
                if ApiError::status_of(&e) == Some(StatusCode::NOT_FOUND)
                    && !base.contains("/api/v2")
                {
                    if let Some(alt_base) = api_v2_variant(&base) {
                        log::warn!("{} returned 404, trying {}", url, alt_base);
                        let alt_url = format!("{}/resources/{}", alt_base, dataset);
                        if let Ok(reply) = self.post_json(&alt_url, request) {
                            return Ok((alt_base, reply));
                        }
                    }
                }
                Err(e)
            }
        }
    }

    pub(crate) fn apply_auth(&self, req: RequestBuilder) -> RequestBuilder {
        if let Some((u, p)) = split_key_basic(&self.key) {
            req.basic_auth(u, Some(p))
        } else {
            req.header("PRIVATE-TOKEN", self.key.trim())
        }
    }

    fn get_json<R: DeserializeOwned>(&self, url: &str) -> Result<R> {
        self.call_json(Method::GET, url, None::<&()>)
    }

    fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.call_json(Method::POST, url, Some(body))
    }

    fn call_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<R> {
        log::debug!("{} {}", method, url);
        let resp = self.robust_request(|| {
            let mut req = self.apply_auth(self.http.request(method.clone(), url));
            if let Some(body) = body {
                req = req.json(body);
            }
            req.send()
        })?;

        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(ApiError::from_body(status, url, &text).into());
        }

        serde_json::from_str::<R>(&text)
            .with_context(|| format!("failed to parse API JSON (url={}, status={})", url, status))
    }

    pub(crate) fn robust_request<F>(&self, mut f: F) -> Result<Response>
    where
        F: FnMut() -> std::result::Result<Response, reqwest::Error>,
    {
        let mut tries = 0usize;
        loop {
            match f() {
                Ok(resp) => {
                    let status = resp.status();
                    if retriable_status(status.as_u16()) {
                        tries += 1;
                        if tries >= self.retry_max {
                            return Ok(resp);
                        }
                        log::warn!(
                            "HTTP {} (attempt {}/{}), retrying in {:?}",
                            status,
                            tries,
                            self.retry_max,
                            self.sleep_max
                        );
                        thread::sleep(self.sleep_max);
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    tries += 1;
                    if tries >= self.retry_max {
                        return Err(err).context("could not connect");
                    }
                    log::warn!(
                        "request error (attempt {}/{}): {}, retrying in {:?}",
                        tries,
                        self.retry_max,
                        err,
                        self.sleep_max
                    );
                    thread::sleep(self.sleep_max);
                }
            }
        }
    }
}

impl Retrieve for Client {
    fn retrieve(&self, dataset: &str, request: &RequestFields, target: &Path) -> Result<()> {
        Client::retrieve(self, dataset, request, Some(target)).map(|_| ())
    }
}

fn build_http(verify: bool, timeout: Duration) -> Result<HttpClient> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("era5-download/{}", env!("CARGO_PKG_VERSION")))
            .unwrap_or(HeaderValue::from_static("era5-download")),
    );

    let mut builder = HttpClient::builder()
        .default_headers(default_headers)
        .timeout(timeout);

    if !verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build().context("failed to build HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::DatasetRequest;
    use crate::testing::{Reply, StubServer, quick_client};
    use serde_json::Value;

    fn config(key: &str) -> ClientConfig {
        ClientConfig {
            url: "https://cds.example.invalid/api".to_string(),
            key: key.to_string(),
            verify: true,
        }
    }

    #[test]
    fn builder_options_are_applied() {
        let client = Client::with_config(config("token"))
            .unwrap()
            .with_retry_max(0)
            .with_sleep_max(Duration::from_secs(3))
            .with_progress(false)
            .with_wait_until_complete(false);

        assert_eq!(client.url(), "https://cds.example.invalid/api");
        assert_eq!(client.retry_max, 1);
        assert_eq!(client.sleep_max, Duration::from_secs(3));
        assert!(!client.progress);
        assert!(!client.wait_until_complete);
    }

    #[test]
    fn timeout_rebuilds_http_client() {
        let client = Client::with_config(config("token"))
            .unwrap()
            .with_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(client.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn token_key_rejects_no_wait_before_any_request() {
        let client = Client::with_config(config("token-without-colon"))
            .unwrap()
            .with_wait_until_complete(false);

        let err = client
            .retrieve("reanalysis-era5-single-levels", &Value::Null, None)
            .unwrap_err();
        assert!(err.to_string().contains("wait_until_complete=false"));
    }

    const DATASET: &str = "reanalysis-era5-single-levels";

    #[test]
    fn legacy_request_polls_until_completed_then_downloads() {
        let mut server = StubServer::bind();
        let base = format!("{}/api", server.base());
        server.serve(vec![
            Reply::json(202, r#"{"state":"queued","request_id":"r1"}"#),
            Reply::json(
                200,
                r#"{"state":"completed","request_id":"r1","location":"/cache/r1.nc","contentLength":5}"#,
            ),
            Reply::bytes(200, b"CDF01"),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("download.nc");

        let client = quick_client(&base, "12345:secret");
        let request = DatasetRequest::era5_single_levels_sample();
        let file = client
            .retrieve(DATASET, request.fields(), Some(target.as_path()))
            .unwrap();

        assert_eq!(file.location, format!("{}/cache/r1.nc", base));
        assert_eq!(std::fs::read(&target).unwrap(), b"CDF01");
        assert_eq!(
            server.paths(),
            [
                "/api/resources/reanalysis-era5-single-levels",
                "/api/tasks/r1",
                "/api/cache/r1.nc"
            ]
        );

        let seen = server.seen();
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[1].method, "GET");
        assert!(seen[0].header("authorization").unwrap().starts_with("Basic "));
        let body: Value = serde_json::from_str(&seen[0].body).unwrap();
        assert_eq!(body, request.to_value().unwrap());
    }

    #[test]
    fn legacy_404_retries_under_api_v2() {
        let mut server = StubServer::bind();
        let base = format!("{}/api", server.base());
        server.serve(vec![
            Reply::json(404, r#"{"title":"not found"}"#),
            Reply::json(
                200,
                r#"{"state":"completed","location":"/cache/x.nc","contentLength":3}"#,
            ),
        ]);

        let client = quick_client(&base, "12345:secret");
        let file = client
            .retrieve(DATASET, &serde_json::json!({"year": "1994"}), None)
            .unwrap();

        assert_eq!(file.location, format!("{}/v2/cache/x.nc", base));
        assert_eq!(file.content_length, 3);
        assert_eq!(
            server.paths(),
            [
                "/api/resources/reanalysis-era5-single-levels",
                "/api/v2/resources/reanalysis-era5-single-levels"
            ]
        );
    }

    #[test]
    fn legacy_no_wait_reports_queued_request() {
        let mut server = StubServer::bind();
        let base = format!("{}/api", server.base());
        server.serve(vec![Reply::json(
            202,
            r#"{"state":"queued","request_id":"r7"}"#,
        )]);

        let client = quick_client(&base, "12345:secret").with_wait_until_complete(false);
        let err = client
            .retrieve(DATASET, &serde_json::json!({}), None)
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("queued"), "{msg}");
        assert!(msg.contains("request_id=r7"), "{msg}");
        assert_eq!(server.paths().len(), 1);
    }

    #[test]
    fn token_request_runs_through_retrieve_api() {
        let mut server = StubServer::bind();
        let root = server.base().to_string();
        let jobs = format!("{}/api/retrieve/v1/jobs/j1", root);
        server.serve(vec![
            Reply::json(
                201,
                &format!(r#"{{"jobID":"j1","links":[{{"rel":"monitor","href":"{}"}}]}}"#, jobs),
            ),
            Reply::json(200, r#"{"status":"running"}"#),
            Reply::json(
                200,
                &format!(
                    r#"{{"status":"successful","links":[{{"rel":"results","href":"{}/results"}}]}}"#,
                    jobs
                ),
            ),
            Reply::json(
                200,
                &format!(
                    r#"{{"asset":{{"value":{{"href":"{}/download/j1.nc","file:size":3,"type":"application/netcdf"}}}}}}"#,
                    root
                ),
            ),
            Reply::bytes(200, b"CDF"),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("era5.nc");

        let client = quick_client(&format!("{}/api", root), "pat-token");
        let request = DatasetRequest::era5_single_levels_sample();
        Retrieve::retrieve(&client, DATASET, request.fields(), &target).unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"CDF");
        assert_eq!(
            server.paths(),
            [
                "/api/retrieve/v1/processes/reanalysis-era5-single-levels/execution",
                "/api/retrieve/v1/jobs/j1?log=true&request=true",
                "/api/retrieve/v1/jobs/j1?log=true&request=true",
                "/api/retrieve/v1/jobs/j1/results",
                "/download/j1.nc"
            ]
        );

        let seen = server.seen();
        assert_eq!(seen[0].header("private-token"), Some("pat-token"));
        let body: Value = serde_json::from_str(&seen[0].body).unwrap();
        assert_eq!(body["inputs"], request.to_value().unwrap());
    }

    #[test]
    fn transient_status_is_retried() {
        let mut server = StubServer::bind();
        server.serve(vec![
            Reply::bytes(503, b"busy"),
            Reply::json(200, r#"{"ok":true}"#),
        ]);

        let client = quick_client(server.base(), "pat-token");
        let value: Value = client
            .get_json(&format!("{}/ping", server.base()))
            .unwrap();

        assert_eq!(value["ok"], true);
        assert_eq!(server.paths(), ["/ping", "/ping"]);
    }

    #[test]
    fn transient_status_gives_up_after_retry_max() {
        let mut server = StubServer::bind();
        server.serve(vec![Reply::bytes(503, b"busy"), Reply::bytes(503, b"busy")]);

        let client = quick_client(server.base(), "pat-token").with_retry_max(2);
        let err = client
            .get_json::<Value>(&format!("{}/ping", server.base()))
            .unwrap_err();

        assert_eq!(ApiError::status_of(&err), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(server.paths().len(), 2);
    }
}
