//! The pull session and its state machine.
//!
//! One [`Pull`] handle drives one image pull at a time through the phases
//! SEARCH → RESOLVE → METADATA → DOWNLOAD → COPY. Session state discovered on
//! the wire (auth token, registry endpoints, the resolved image id and its
//! ancestry) is threaded through every subsequent request.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use futures::StreamExt;
use getset::Getters;
use reqwest::{Client, Url, header};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use tokio::sync::watch;
use typed_builder::TypedBuilder;

use layerpull_utils::DEFAULT_TAG;

use crate::{
    LayerpullError, LayerpullResult,
    dkr::{
        JobKind, LayerDriver, LayerId, MachineName, ProgressReporter, PullPhase, RepoName,
        TOKEN_HEADER, TagName, WireHeaders, make_local_copy, parse_ancestry, parse_id,
        sift_headers,
    },
    snapshot::{CowFs, DirCow},
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A pull engine bound to one index service and one image root.
///
/// The handle is cheap to share behind an `Arc`; at most one pull runs at a
/// time and a second `start` fails with [`LayerpullError::Busy`].
#[derive(Getters)]
pub struct Pull {
    /// Base URL of the index service, trailing slash stripped.
    #[getset(get = "pub with_prefix")]
    index_url: String,

    /// Directory materialized layers live under.
    #[getset(get = "pub with_prefix")]
    image_root: PathBuf,

    /// Scheme used toward discovered registry endpoints; follows the index URL.
    scheme: String,

    /// The HTTP client used to make requests, with transient-error retries.
    client: ClientWithMiddleware,

    /// The copy-on-write backend snapshots are built with.
    cow: Arc<dyn CowFs>,

    /// Whether a pull is currently running.
    busy: AtomicBool,

    /// Carries the 0..=100 pull percentage to subscribers.
    progress_tx: watch::Sender<u8>,
}

impl std::fmt::Debug for Pull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pull")
            .field("index_url", &self.index_url)
            .field("image_root", &self.image_root)
            .field("scheme", &self.scheme)
            .field("busy", &self.busy)
            .finish_non_exhaustive()
    }
}

/// Parameters for one pull.
#[derive(Debug, Clone, TypedBuilder)]
pub struct PullRequest {
    /// Repository to pull, e.g. `library/alpine`.
    #[builder(setter(into))]
    pub(crate) name: String,

    /// Tag to resolve; defaults to `latest`.
    #[builder(default, setter(strip_option, into))]
    pub(crate) tag: Option<String>,

    /// Local alias to create once the pull completed.
    #[builder(default, setter(strip_option, into))]
    pub(crate) local: Option<String>,

    /// Replace the local alias if it already exists.
    #[builder(default)]
    pub(crate) force_local: bool,
}

/// What a successful pull produced.
#[derive(Debug, Getters)]
#[getset(get = "pub with_prefix")]
pub struct PullOutcome {
    /// Content address of the image's tip layer.
    id: LayerId,

    /// Directory the tip layer is materialized at.
    path: PathBuf,

    /// Number of layers fetched by this pull.
    layers_pulled: usize,

    /// Number of layers reused from earlier pulls.
    layers_reused: usize,

    /// Path of the local alias, when one was requested.
    local_path: Option<PathBuf>,

    /// The raw image metadata document; the engine does not interpret it.
    image_json: Bytes,
}

/// Mutable per-pull state, owned by the pull task for one `start`.
pub(crate) struct Session {
    pub(crate) name: RepoName,
    pub(crate) tag: TagName,
    pub(crate) id: Option<LayerId>,
    pub(crate) token: Option<String>,
    pub(crate) registries: Vec<String>,
    pub(crate) ancestry: Vec<LayerId>,
    pub(crate) current_ancestry: usize,
    pub(crate) local: Option<MachineName>,
    pub(crate) force_local: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Session {
    /// Folds one response's session headers into the running state. Tokens and
    /// endpoint lists returned by any response overwrite what came before.
    pub(crate) fn absorb(&mut self, headers: WireHeaders) {
        if let Some(token) = headers.token {
            self.token = Some(token);
        }
        if let Some(endpoints) = headers.endpoints {
            self.registries = endpoints;
        }
    }

    /// The registry endpoint this session talks to.
    // Only the first discovered endpoint is ever used; there is no failover.
    pub(crate) fn registry(&self) -> LayerpullResult<&str> {
        self.registries
            .first()
            .map(String::as_str)
            .ok_or_else(|| {
                LayerpullError::Protocol("no registry endpoints discovered".to_string())
            })
    }
}

impl Pull {
    /// Creates a pull engine with the plain-directory snapshot backend.
    ///
    /// Validates `index_url` as an HTTP(S) URL and strips a trailing slash.
    /// No I/O is performed.
    pub fn new(
        index_url: impl AsRef<str>,
        image_root: impl Into<PathBuf>,
    ) -> LayerpullResult<Self> {
        Self::with_cow_fs(index_url, image_root, Arc::new(DirCow))
    }

    /// Creates a pull engine from the environment.
    ///
    /// Honors the `LAYERPULL_INDEX_URL` and `LAYERPULL_IMAGE_ROOT` overrides
    /// and falls back to the built-in defaults.
    pub fn from_env() -> LayerpullResult<Self> {
        Self::new(
            layerpull_utils::get_index_url(),
            layerpull_utils::get_image_root_path(),
        )
    }

    /// Creates a pull engine with a custom copy-on-write backend.
    pub fn with_cow_fs(
        index_url: impl AsRef<str>,
        image_root: impl Into<PathBuf>,
        cow: Arc<dyn CowFs>,
    ) -> LayerpullResult<Self> {
        let index_url = index_url.as_ref();
        let url = Url::parse(index_url).map_err(|err| {
            LayerpullError::InvalidArgument(format!("invalid index url {index_url:?}: {err}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(LayerpullError::InvalidArgument(format!(
                "index url must be http or https: {index_url:?}"
            )));
        }
        if url.host_str().is_none() {
            return Err(LayerpullError::InvalidArgument(format!(
                "index url has no host: {index_url:?}"
            )));
        }

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        let (progress_tx, _) = watch::channel(0u8);

        Ok(Self {
            index_url: index_url.trim_end_matches('/').to_string(),
            scheme: url.scheme().to_string(),
            image_root: image_root.into(),
            client,
            cow,
            busy: AtomicBool::new(false),
            progress_tx,
        })
    }

    /// Returns a receiver observing the current pull percentage.
    pub fn subscribe_progress(&self) -> watch::Receiver<u8> {
        self.progress_tx.subscribe()
    }

    /// Runs one pull to completion.
    ///
    /// Identifier validation happens before any I/O and surfaces
    /// [`LayerpullError::InvalidArgument`]; a pull already in flight surfaces
    /// [`LayerpullError::Busy`]. The returned future resolves exactly once per
    /// start, with the outcome or the first unrecoverable error.
    pub async fn start(&self, request: PullRequest) -> LayerpullResult<PullOutcome> {
        let name: RepoName = request.name.parse()?;
        let tag: TagName = request.tag.as_deref().unwrap_or(DEFAULT_TAG).parse()?;
        let local = request
            .local
            .as_deref()
            .map(|local| local.parse::<MachineName>())
            .transpose()?;

        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(LayerpullError::Busy);
        }
        let _busy = scopeguard::guard((), |_| self.busy.store(false, Ordering::Release));

        let mut session = Session {
            name,
            tag,
            id: None,
            token: None,
            registries: Vec::new(),
            ancestry: Vec::new(),
            current_ancestry: 0,
            local,
            force_local: request.force_local,
        };
        let progress = ProgressReporter::new(self.progress_tx.clone());

        tracing::info!(name = %session.name, tag = %session.tag, "starting pull");
        let result = self.run(&mut session, &progress).await;
        match &result {
            Ok(outcome) => tracing::info!(
                id = %outcome.id.short(),
                pulled = outcome.layers_pulled,
                reused = outcome.layers_reused,
                "pull complete"
            ),
            Err(err) => tracing::warn!(%err, name = %session.name, "pull failed"),
        }
        result
    }

    async fn run(
        &self,
        session: &mut Session,
        progress: &ProgressReporter,
    ) -> LayerpullResult<PullOutcome> {
        // SEARCH: ask the index for the repository; the interesting part of
        // the answer is in the headers (token + registry endpoints).
        progress.enter_phase(PullPhase::Search);
        let url = format!(
            "{}/v1/repositories/{}/images",
            self.index_url, session.name
        );
        let (headers, _body) = self
            .fetch(JobKind::Images, &url, session.token.as_deref(), progress)
            .await?;
        session.absorb(headers);
        if session.registries.is_empty() {
            return Err(LayerpullError::Protocol(
                "index response named no registry endpoints".to_string(),
            ));
        }

        // RESOLVE: turn the tag into the tip layer's content address.
        progress.enter_phase(PullPhase::Resolve);
        let url = format!(
            "{}/v1/repositories/{}/tags/{}",
            self.registry_base(session)?,
            session.name,
            session.tag
        );
        let (headers, body) = self
            .fetch(JobKind::Tags, &url, session.token.as_deref(), progress)
            .await?;
        session.absorb(headers);
        let id = parse_id(&body)?;
        tracing::info!(tag = %session.tag, id = %id.short(), "resolved tag");
        session.id = Some(id.clone());

        // METADATA: ancestry and the raw image document, fetched concurrently;
        // their completions may arrive in either order.
        progress.enter_phase(PullPhase::Metadata);
        let base = self.registry_base(session)?;
        let token = session.token.clone();
        let ancestry_url = format!("{}/v1/images/{}/ancestry", base, id);
        let json_url = format!("{}/v1/images/{}/json", base, id);
        let (ancestry_response, json_response) = tokio::try_join!(
            self.fetch(JobKind::Ancestry, &ancestry_url, token.as_deref(), progress),
            self.fetch(JobKind::Json, &json_url, token.as_deref(), progress),
        )?;
        let (ancestry_headers, ancestry_body) = ancestry_response;
        let (json_headers, image_json) = json_response;
        session.absorb(ancestry_headers);
        session.absorb(json_headers);

        let ancestry = parse_ancestry(&ancestry_body)?;
        if ancestry.last() != Some(&id) {
            return Err(LayerpullError::Protocol(format!(
                "ancestry tip {} does not match resolved id {}",
                ancestry.last().map(LayerId::short).unwrap_or("<none>"),
                id.short()
            )));
        }
        tracing::info!(layers = ancestry.len(), "decoded ancestry");
        session.ancestry = ancestry;

        // DOWNLOAD: materialize the chain, parent-first.
        progress.enter_phase(PullPhase::Download);
        let driver = LayerDriver {
            pull: self,
            progress,
        };
        let stats = driver.run(session).await?;

        // COPY: the optional user-visible alias, then done.
        progress.enter_phase(PullPhase::Copy);
        let path = self.layer_path(&id);
        let local_path = match &session.local {
            Some(local) => Some(
                make_local_copy(
                    self.cow.as_ref(),
                    &self.image_root,
                    &path,
                    local,
                    session.force_local,
                )
                .await?,
            ),
            None => None,
        };
        progress.finish();

        Ok(PullOutcome {
            id,
            path,
            layers_pulled: stats.pulled,
            layers_reused: stats.reused,
            local_path,
            image_json,
        })
    }

    /// Issues one GET and buffers its body, reporting per-chunk progress.
    async fn fetch(
        &self,
        kind: JobKind,
        url: &str,
        token: Option<&str>,
        progress: &ProgressReporter,
    ) -> LayerpullResult<(WireHeaders, Bytes)> {
        let response = self.issue(kind, url, token).await?;
        let headers = sift_headers(response.headers())?;

        let total = response.content_length();
        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            body.extend_from_slice(&chunk);
            if let Some(total) = total {
                if total > 0 {
                    let percent = ((100 * body.len() as u64) / total).min(100) as u8;
                    progress.job(kind, percent);
                }
            }
        }
        progress.job(kind, 100);

        Ok((headers, Bytes::from(body)))
    }

    /// Builds and sends one request with the session's auth headers attached.
    ///
    /// Every request announces `Accept: application/json` and carries either
    /// the propagated token or the bootstrap header asking the index to issue
    /// one. Non-success statuses are registry errors.
    pub(crate) async fn issue(
        &self,
        kind: JobKind,
        url: &str,
        token: Option<&str>,
    ) -> LayerpullResult<reqwest::Response> {
        tracing::debug!(?kind, %url, "issuing request");

        let request = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json");
        let request = match token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Token {token}")),
            None => request.header(TOKEN_HEADER, "true"),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LayerpullError::Registry {
                status,
                url: url.to_string(),
            });
        }

        Ok(response)
    }

    /// Base URL for requests against the session's registry endpoint.
    pub(crate) fn registry_base(&self, session: &Session) -> LayerpullResult<String> {
        Ok(format!("{}://{}", self.scheme, session.registry()?))
    }

    /// The directory a layer is (or will be) materialized at.
    pub(crate) fn layer_path(&self, layer: &LayerId) -> PathBuf {
        self.image_root
            .join(layerpull_utils::layer_dir_name(layer.as_str()))
    }

    pub(crate) fn cow(&self) -> &dyn CowFs {
        self.cow.as_ref()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn image_root() -> &'static Path {
        Path::new("/tmp/layerpull-test-root")
    }

    #[test]
    fn new_strips_trailing_slashes() {
        let pull = Pull::new("https://index.example/", image_root()).unwrap();
        assert_eq!(pull.get_index_url(), "https://index.example");
    }

    #[test]
    fn new_rejects_non_http_urls() {
        assert!(matches!(
            Pull::new("ftp://index.example", image_root()).unwrap_err(),
            LayerpullError::InvalidArgument(_)
        ));
        assert!(matches!(
            Pull::new("not a url", image_root()).unwrap_err(),
            LayerpullError::InvalidArgument(_)
        ));
    }

    #[test]
    fn from_env_honors_the_index_url_override() {
        unsafe {
            std::env::set_var(
                layerpull_utils::LAYERPULL_INDEX_URL_ENV_VAR,
                "http://index.test:5000",
            )
        };
        let pull = Pull::from_env().unwrap();
        unsafe { std::env::remove_var(layerpull_utils::LAYERPULL_INDEX_URL_ENV_VAR) };

        assert_eq!(pull.get_index_url(), "http://index.test:5000");
    }

    #[test]
    fn request_builder_defaults_are_empty() {
        let request = PullRequest::builder().name("library/alpine").build();
        assert_eq!(request.name, "library/alpine");
        assert!(request.tag.is_none());
        assert!(request.local.is_none());
        assert!(!request.force_local);
    }

    #[tokio::test]
    async fn start_validates_identifiers_before_any_io() {
        let pull = Pull::new("https://index.invalid", image_root()).unwrap();

        let err = pull
            .start(PullRequest::builder().name("Bad Name").build())
            .await
            .unwrap_err();
        assert!(matches!(err, LayerpullError::InvalidArgument(_)));

        let err = pull
            .start(
                PullRequest::builder()
                    .name("library/alpine")
                    .tag(".bad")
                    .build(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LayerpullError::InvalidArgument(_)));

        let err = pull
            .start(
                PullRequest::builder()
                    .name("library/alpine")
                    .local("bad name")
                    .build(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LayerpullError::InvalidArgument(_)));
    }

    #[test]
    fn layer_paths_use_the_layer_dir_prefix() {
        let pull = Pull::new("https://index.example", "/images").unwrap();
        let layer: LayerId = "ab".repeat(32).parse().unwrap();
        assert_eq!(
            pull.layer_path(&layer),
            PathBuf::from(format!("/images/.dkr-{}", "ab".repeat(32)))
        );
    }
}
