use std::cell::Cell;
use std::time::Duration;

use anyhow::{Context, Result};
use ferry_retry::{Attempted, RetryExecutor, RetryStrategyConfig};
use ferry_types::{AuthToken, CancelToken, RegistrySettings, Release, ReleaseAsset, Tag};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::{RegistryError, ReleaseRegistry, Uploaded};

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("ferry/", env!("CARGO_PKG_VERSION"));

const GITHUB_JSON: &str = "application/vnd.github+json";
const MAX_ERROR_BODY: usize = 200;

/// Release registry client over the GitHub releases REST API.
#[derive(Debug, Clone)]
pub struct HttpReleaseRegistry {
    settings: RegistrySettings,
    token: AuthToken,
    http: Client,
    retry: RetryStrategyConfig,
    sleep: fn(Duration),
    cancel: CancelToken,
}

impl HttpReleaseRegistry {
    pub fn new(settings: RegistrySettings, token: AuthToken) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            settings,
            token,
            http,
            retry: RetryStrategyConfig::default(),
            sleep: std::thread::sleep,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_retry(mut self, retry: RetryStrategyConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the wait between attempts (tests use a no-op).
    pub fn with_sleeper(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    /// Stop retrying once `cancel` is raised. In-flight requests still finish.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Look up the release for `tag`, retrying transient failures.
    pub fn fetch_release(&self, tag: &Tag) -> Result<Option<Release>, RegistryError> {
        self.retrying("exists", |_| self.fetch_release_once("exists", tag))
            .map(|done| done.value)
    }

    fn retrying<T, F>(&self, operation: &'static str, op: F) -> Result<Attempted<T>, RegistryError>
    where
        F: FnMut(u32) -> Result<T, RegistryError>,
    {
        let executor = RetryExecutor::new(self.retry.clone()).with_sleeper(self.sleep);
        match executor.run_classified(|| self.cancel.is_cancelled(), op) {
            Ok(done) => Ok(done),
            Err(Attempted {
                value: RegistryError::Transient { message, .. },
                attempts,
            }) => {
                if self.cancel.is_cancelled() {
                    Err(RegistryError::Cancelled { operation })
                } else {
                    Err(RegistryError::Unavailable {
                        operation,
                        attempts,
                        message,
                    })
                }
            }
            Err(Attempted { value, .. }) => Err(value),
        }
    }

    fn repo_url(&self, base: &str, path: &str) -> String {
        format!("{}/repos/{}/{}", base, self.settings.repository, path)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(AUTHORIZATION, format!("Bearer {}", self.token.expose()))
            .header(ACCEPT, GITHUB_JSON)
    }

    fn fetch_release_once(
        &self,
        operation: &'static str,
        tag: &Tag,
    ) -> Result<Option<Release>, RegistryError> {
        let url = self.repo_url(&self.settings.api_base, &format!("releases/tags/{tag}"));
        let resp = self
            .authorized(self.http.get(url))
            .send()
            .map_err(|e| transport(operation, e))?;

        match resp.status() {
            StatusCode::OK => {
                let body: ReleaseResponse = decode(operation, resp)?;
                Ok(Some(body.into_release(tag)))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(status_error(operation, resp)),
        }
    }

    fn create_once(&self, tag: &Tag, title: &str, notes: &str) -> Result<Release, RegistryError> {
        let url = self.repo_url(&self.settings.api_base, "releases");
        let payload = CreateRelease {
            tag_name: tag.as_str(),
            name: title,
            body: notes,
            draft: false,
            prerelease: false,
        };
        let resp = self
            .authorized(self.http.post(url))
            .json(&payload)
            .send()
            .map_err(|e| transport("create", e))?;

        match resp.status() {
            StatusCode::CREATED | StatusCode::OK => {
                let body: ReleaseResponse = decode("create", resp)?;
                Ok(body.into_release(tag))
            }
            StatusCode::UNPROCESSABLE_ENTITY => {
                let text = resp.text().unwrap_or_default();
                if text.contains("already_exists") {
                    Err(RegistryError::AlreadyExists { tag: tag.clone() })
                } else {
                    Err(RegistryError::Rejected {
                        operation: "create",
                        status: 422,
                        message: truncate(&text),
                    })
                }
            }
            _ => Err(status_error("create", resp)),
        }
    }

    fn delete_asset_once(&self, asset_id: u64) -> Result<(), RegistryError> {
        let url = self.repo_url(
            &self.settings.api_base,
            &format!("releases/assets/{asset_id}"),
        );
        let resp = self
            .authorized(self.http.delete(url))
            .send()
            .map_err(|e| transport("upload", e))?;

        match resp.status() {
            // Already gone: a concurrent run replaced it first.
            StatusCode::NO_CONTENT | StatusCode::OK | StatusCode::NOT_FOUND => Ok(()),
            _ => Err(status_error("upload", resp)),
        }
    }

    fn post_asset_once(
        &self,
        release_id: u64,
        name: &str,
        content: &[u8],
    ) -> Result<ReleaseAsset, RegistryError> {
        let base = self.repo_url(
            &self.settings.upload_base,
            &format!("releases/{release_id}/assets"),
        );
        let mut url = reqwest::Url::parse(&base).map_err(|e| RegistryError::Rejected {
            operation: "upload",
            status: 0,
            message: format!("invalid upload url: {e}"),
        })?;
        url.query_pairs_mut().append_pair("name", name);

        let resp = self
            .authorized(self.http.post(url))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(content.to_vec())
            .send()
            .map_err(|e| transport("upload", e))?;

        match resp.status() {
            StatusCode::CREATED | StatusCode::OK => {
                let asset: AssetResponse = decode("upload", resp)?;
                Ok(asset.into())
            }
            // Name taken by a concurrent writer; the next attempt replaces it.
            StatusCode::UNPROCESSABLE_ENTITY => Err(RegistryError::Transient {
                operation: "upload",
                message: format!("asset {name} was attached concurrently"),
            }),
            _ => Err(status_error("upload", resp)),
        }
    }

    /// One upload attempt: look the release up, delete a same-named asset,
    /// post the content. Sets `removed_previous` once a delete succeeds.
    fn upload_once(
        &self,
        tag: &Tag,
        name: &str,
        content: &[u8],
        removed_previous: &Cell<bool>,
    ) -> Result<(ReleaseAsset, bool), RegistryError> {
        let release = self
            .fetch_release_once("upload", tag)?
            .ok_or_else(|| RegistryError::ReleaseNotFound { tag: tag.clone() })?;

        let replaced = match release.asset(name) {
            Some(existing) => {
                self.delete_asset_once(existing.id)?;
                removed_previous.set(true);
                true
            }
            None => false,
        };

        let asset = self.post_asset_once(release.id, name, content)?;
        Ok((asset, replaced))
    }
}

impl ReleaseRegistry for HttpReleaseRegistry {
    fn exists(&self, tag: &Tag) -> Result<bool, RegistryError> {
        Ok(self.fetch_release(tag)?.is_some())
    }

    fn create(&self, tag: &Tag, title: &str, notes: &str) -> Result<Release, RegistryError> {
        self.retrying("create", |_| self.create_once(tag, title, notes))
            .map(|done| done.value)
    }

    fn upload(&self, tag: &Tag, name: &str, content: &[u8]) -> Result<Uploaded, RegistryError> {
        if content.is_empty() {
            return Err(RegistryError::EmptyContent {
                name: name.to_string(),
            });
        }

        let attempts = Cell::new(0);
        let removed_previous = Cell::new(false);
        let done = self
            .retrying("upload", |attempt| {
                attempts.set(attempt);
                self.upload_once(tag, name, content, &removed_previous)
            })
            .map_err(|e| match e {
                RegistryError::Cancelled { .. } => RegistryError::Interrupted {
                    name: name.to_string(),
                    attempts: attempts.get(),
                    removed_previous: removed_previous.get(),
                },
                other => other,
            })?;

        let (asset, replaced) = done.value;
        Ok(Uploaded {
            asset,
            attempts: done.attempts,
            replaced: replaced || removed_previous.get(),
        })
    }
}

#[derive(Debug, Serialize)]
struct CreateRelease<'a> {
    tag_name: &'a str,
    name: &'a str,
    body: &'a str,
    draft: bool,
    prerelease: bool,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    assets: Vec<AssetResponse>,
}

impl ReleaseResponse {
    fn into_release(self, tag: &Tag) -> Release {
        Release {
            id: self.id,
            tag: tag.clone(),
            title: self.name.unwrap_or_default(),
            notes: self.body.unwrap_or_default(),
            assets: self.assets.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
    id: u64,
    name: String,
    #[serde(default)]
    size: u64,
}

impl From<AssetResponse> for ReleaseAsset {
    fn from(a: AssetResponse) -> Self {
        ReleaseAsset {
            id: a.id,
            name: a.name,
            size: a.size,
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(
    operation: &'static str,
    resp: Response,
) -> Result<T, RegistryError> {
    resp.json().map_err(|e| RegistryError::Transient {
        operation,
        message: format!("invalid response body: {e}"),
    })
}

fn transport(operation: &'static str, e: reqwest::Error) -> RegistryError {
    RegistryError::Transient {
        operation,
        message: e.to_string(),
    }
}

fn status_error(operation: &'static str, resp: Response) -> RegistryError {
    let status = resp.status();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RegistryError::Unauthorized {
            operation,
            status: status.as_u16(),
        },
        s if s.is_server_error()
            || s == StatusCode::REQUEST_TIMEOUT
            || s == StatusCode::TOO_MANY_REQUESTS =>
        {
            RegistryError::Transient {
                operation,
                message: format!("status {s}"),
            }
        }
        s => RegistryError::Rejected {
            operation,
            status: s.as_u16(),
            message: truncate(&resp.text().unwrap_or_default()),
        },
    }
}

fn truncate(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use ferry_retry::RetryStrategyType;
    use ferry_types::Version;
    use tiny_http::{Header, Response, Server, StatusCode};

    use super::*;

    #[derive(Debug, Clone)]
    struct Seen {
        method: String,
        url: String,
        auth: Option<String>,
        body: Vec<u8>,
    }

    struct TestServer {
        base_url: String,
        handle: thread::JoinHandle<Vec<Seen>>,
    }

    impl TestServer {
        fn join(self) -> Vec<Seen> {
            self.handle.join().expect("join server")
        }
    }

    /// Serve the scripted responses in order, one per request.
    fn spawn_server(script: Vec<(u16, &'static str)>) -> TestServer {
        serve(script, None)
    }

    /// Like `spawn_server`, but raise `cancel` while answering request `at`
    /// (zero-based).
    fn spawn_cancelling_server(
        script: Vec<(u16, &'static str)>,
        at: usize,
        cancel: CancelToken,
    ) -> TestServer {
        serve(script, Some((at, cancel)))
    }

    fn serve(script: Vec<(u16, &'static str)>, cancel_at: Option<(usize, CancelToken)>) -> TestServer {
        let server = Server::http("127.0.0.1:0").expect("server");
        let base_url = format!("http://{}", server.server_addr());

        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for (idx, (status, body)) in script.into_iter().enumerate() {
                let mut req = server.recv().expect("request");
                let mut buf = Vec::new();
                req.as_reader().read_to_end(&mut buf).expect("body");
                seen.push(Seen {
                    method: req.method().to_string(),
                    url: req.url().to_string(),
                    auth: req
                        .headers()
                        .iter()
                        .find(|h| h.field.equiv("Authorization"))
                        .map(|h| h.value.as_str().to_string()),
                    body: buf,
                });
                if let Some((at, cancel)) = &cancel_at
                    && *at == idx
                {
                    cancel.cancel();
                }
                let resp = Response::from_string(body)
                    .with_status_code(StatusCode(status))
                    .with_header(
                        Header::from_bytes("Content-Type", "application/json").expect("header"),
                    );
                req.respond(resp).expect("respond");
            }
            seen
        });

        TestServer { base_url, handle }
    }

    fn client(base_url: &str) -> HttpReleaseRegistry {
        let settings = RegistrySettings {
            repository: "acme/app".to_string(),
            api_base: base_url.to_string(),
            upload_base: base_url.to_string(),
            timeout: Duration::from_secs(5),
        };
        HttpReleaseRegistry::new(settings, AuthToken::new("s3cr3t"))
            .expect("client")
            .with_retry(RetryStrategyConfig {
                strategy: RetryStrategyType::Immediate,
                max_attempts: 3,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                jitter: 0.0,
            })
            .with_sleeper(|_| {})
    }

    fn tag() -> Tag {
        Version::new_unchecked("2.0.0").tag()
    }

    const RELEASE: &str = r#"{"id":7,"tag_name":"v2.0.0","name":"Release v2.0.0","body":"notes","assets":[]}"#;
    const RELEASE_WITH_ASSET: &str = r#"{"id":7,"tag_name":"v2.0.0","name":"Release v2.0.0","body":"notes","assets":[{"id":41,"name":"app-linux-x64","size":3}]}"#;
    const ASSET: &str = r#"{"id":42,"name":"app-linux-x64","size":5}"#;

    #[test]
    fn exists_maps_200_and_404() {
        let srv = spawn_server(vec![(200, RELEASE), (404, "{}")]);
        let c = client(&srv.base_url);
        assert!(c.exists(&tag()).expect("exists"));
        assert!(!c.exists(&tag()).expect("exists"));
        let seen = srv.join();
        assert_eq!(seen[0].url, "/repos/acme/app/releases/tags/v2.0.0");
        assert_eq!(seen[0].auth.as_deref(), Some("Bearer s3cr3t"));
    }

    #[test]
    fn exists_retries_transient_failures() {
        let srv = spawn_server(vec![(503, "{}"), (502, "{}"), (200, RELEASE)]);
        let c = client(&srv.base_url);
        assert!(c.exists(&tag()).expect("exists"));
        assert_eq!(srv.join().len(), 3);
    }

    #[test]
    fn exists_surfaces_unavailable_after_bounded_attempts() {
        let srv = spawn_server(vec![(503, "{}"), (503, "{}"), (503, "{}")]);
        let c = client(&srv.base_url);
        let err = c.exists(&tag()).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Unavailable {
                operation: "exists",
                attempts: 3,
                ..
            }
        ));
        assert_eq!(srv.join().len(), 3);
    }

    #[test]
    fn unauthorized_is_not_retried_and_never_leaks_token() {
        let srv = spawn_server(vec![(401, r#"{"message":"Bad credentials"}"#)]);
        let c = client(&srv.base_url);
        let err = c.exists(&tag()).unwrap_err();
        assert!(matches!(err, RegistryError::Unauthorized { status: 401, .. }));
        assert!(!err.to_string().contains("s3cr3t"));
        assert!(!format!("{c:?}").contains("s3cr3t"));
        assert_eq!(srv.join().len(), 1);
    }

    #[test]
    fn create_posts_release_payload() {
        let srv = spawn_server(vec![(201, RELEASE)]);
        let c = client(&srv.base_url);
        let release = c.create(&tag(), "Release v2.0.0", "notes").expect("create");
        assert_eq!(release.id, 7);
        assert_eq!(release.title, "Release v2.0.0");
        assert_eq!(release.tag, tag());

        let seen = srv.join();
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].url, "/repos/acme/app/releases");
        let payload: serde_json::Value = serde_json::from_slice(&seen[0].body).expect("json");
        assert_eq!(payload["tag_name"], "v2.0.0");
        assert_eq!(payload["name"], "Release v2.0.0");
        assert_eq!(payload["draft"], false);
    }

    #[test]
    fn create_reports_already_exists() {
        let srv = spawn_server(vec![(
            422,
            r#"{"message":"Validation Failed","errors":[{"resource":"Release","code":"already_exists","field":"tag_name"}]}"#,
        )]);
        let c = client(&srv.base_url);
        let err = c.create(&tag(), "t", "n").unwrap_err();
        assert_eq!(err, RegistryError::AlreadyExists { tag: tag() });
        srv.join();
    }

    #[test]
    fn create_other_validation_errors_are_rejections() {
        let srv = spawn_server(vec![(422, r#"{"message":"Validation Failed"}"#)]);
        let c = client(&srv.base_url);
        let err = c.create(&tag(), "t", "n").unwrap_err();
        assert!(matches!(err, RegistryError::Rejected { status: 422, .. }));
        srv.join();
    }

    #[test]
    fn upload_attaches_new_asset() {
        let srv = spawn_server(vec![(200, RELEASE), (201, ASSET)]);
        let c = client(&srv.base_url);
        let up = c.upload(&tag(), "app-linux-x64", b"hello").expect("upload");
        assert_eq!(up.asset.id, 42);
        assert_eq!(up.attempts, 1);
        assert!(!up.replaced);

        let seen = srv.join();
        assert_eq!(seen[1].method, "POST");
        assert_eq!(seen[1].url, "/repos/acme/app/releases/7/assets?name=app-linux-x64");
        assert_eq!(seen[1].body, b"hello");
    }

    #[test]
    fn upload_replaces_existing_asset_instead_of_duplicating() {
        let srv = spawn_server(vec![(200, RELEASE_WITH_ASSET), (204, ""), (201, ASSET)]);
        let c = client(&srv.base_url);
        let up = c.upload(&tag(), "app-linux-x64", b"newer").expect("upload");
        assert!(up.replaced);

        let seen = srv.join();
        let calls: Vec<(String, String)> = seen
            .iter()
            .map(|s| (s.method.clone(), s.url.clone()))
            .collect();
        assert_eq!(
            calls,
            vec![
                ("GET".to_string(), "/repos/acme/app/releases/tags/v2.0.0".to_string()),
                ("DELETE".to_string(), "/repos/acme/app/releases/assets/41".to_string()),
                (
                    "POST".to_string(),
                    "/repos/acme/app/releases/7/assets?name=app-linux-x64".to_string()
                ),
            ]
        );
    }

    #[test]
    fn upload_retries_concurrent_name_conflict() {
        let srv = spawn_server(vec![
            (200, RELEASE),
            (422, r#"{"errors":[{"code":"already_exists"}]}"#),
            (200, RELEASE_WITH_ASSET),
            (204, ""),
            (201, ASSET),
        ]);
        let c = client(&srv.base_url);
        let up = c.upload(&tag(), "app-linux-x64", b"mine").expect("upload");
        assert_eq!(up.attempts, 2);
        assert!(up.replaced);
        assert_eq!(srv.join().len(), 5);
    }

    #[test]
    fn upload_rejects_empty_content_without_network() {
        let c = client("http://127.0.0.1:9");
        let err = c.upload(&tag(), "app", b"").unwrap_err();
        assert_eq!(
            err,
            RegistryError::EmptyContent {
                name: "app".to_string()
            }
        );
    }

    #[test]
    fn upload_to_missing_release_is_permanent() {
        let srv = spawn_server(vec![(404, "{}")]);
        let c = client(&srv.base_url);
        let err = c.upload(&tag(), "app", b"x").unwrap_err();
        assert_eq!(err, RegistryError::ReleaseNotFound { tag: tag() });
        assert_eq!(srv.join().len(), 1);
    }

    #[test]
    fn upload_permanent_rejection_is_not_retried() {
        let srv = spawn_server(vec![(200, RELEASE), (400, r#"{"message":"bad name"}"#)]);
        let c = client(&srv.base_url);
        let err = c.upload(&tag(), "app", b"x").unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Rejected {
                operation: "upload",
                status: 400,
                ..
            }
        ));
        assert_eq!(srv.join().len(), 2);
    }

    #[test]
    fn cancelled_client_stops_retrying() {
        let srv = spawn_server(vec![(503, "{}")]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let c = client(&srv.base_url).with_cancel(cancel);
        let err = c.exists(&tag()).unwrap_err();
        assert_eq!(err, RegistryError::Cancelled { operation: "exists" });
        assert_eq!(srv.join().len(), 1);
    }

    #[test]
    fn cancel_after_delete_reports_removed_asset() {
        let cancel = CancelToken::new();
        let srv = spawn_cancelling_server(
            vec![(200, RELEASE_WITH_ASSET), (204, ""), (503, "{}")],
            2,
            cancel.clone(),
        );
        let c = client(&srv.base_url).with_cancel(cancel);

        let err = c.upload(&tag(), "app-linux-x64", b"new").unwrap_err();

        assert_eq!(
            err,
            RegistryError::Interrupted {
                name: "app-linux-x64".to_string(),
                attempts: 1,
                removed_previous: true,
            }
        );
        let seen: Vec<_> = srv.join().into_iter().map(|s| s.method).collect();
        assert_eq!(seen, vec!["GET", "DELETE", "POST"]);
    }

    #[test]
    fn cancel_without_delete_reports_nothing_removed() {
        let cancel = CancelToken::new();
        let srv = spawn_cancelling_server(vec![(200, RELEASE), (502, "{}")], 1, cancel.clone());
        let c = client(&srv.base_url).with_cancel(cancel);

        let err = c.upload(&tag(), "app-linux-x64", b"new").unwrap_err();

        assert!(matches!(
            err,
            RegistryError::Interrupted {
                attempts: 1,
                removed_previous: false,
                ..
            }
        ));
        assert_eq!(srv.join().len(), 2);
    }

    #[test]
    fn connection_refused_is_transient_then_unavailable() {
        let c = client("http://127.0.0.1:9");
        let err = c.exists(&tag()).unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable { attempts: 3, .. }));
    }

    #[test]
    fn truncate_limits_long_bodies() {
        let long = "x".repeat(500);
        let t = truncate(&long);
        assert_eq!(t.len(), MAX_ERROR_BODY + 3);
        assert!(t.ends_with("..."));
        assert_eq!(truncate("  short \n"), "short");
    }

    #[test]
    fn user_agent_includes_version() {
        assert!(USER_AGENT.starts_with("ferry/"));
        assert!(USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
