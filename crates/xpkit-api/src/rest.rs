// ── REST client ──
//
// Thin client for the simulator's REST surface: capability discovery,
// version negotiation, dataref/command metadata, one-shot value reads,
// writes, and command activation. The `{ "data": ... }` envelope is
// stripped before callers see payloads.

use std::sync::RwLock;

use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::endpoint::ApiEndpoint;
use crate::error::Error;
use crate::meta::{CommandMeta, DatarefMeta, MetaCache};
use crate::transport::TransportConfig;

/// Oldest simulator version the Web API client is tested against.
const XP_MIN_VERSION: (u64, u64, u64) = (12, 1, 4);
/// Newest simulator version the Web API client is tested against.
const XP_MAX_VERSION: (u64, u64, u64) = (12, 2, 1);

// ── Capabilities ─────────────────────────────────────────────────────

/// Capabilities document served at `/api/capabilities` (12.1.4+).
#[derive(Debug, Clone, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub api: ApiCapabilities,
    #[serde(rename = "x-plane", default)]
    pub xplane: XplaneInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiCapabilities {
    #[serde(default)]
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct XplaneInfo {
    #[serde(default)]
    pub version: Option<String>,
}

impl Capabilities {
    /// Synthetic capabilities for simulators that predate `/api/capabilities`
    /// but already serve `/api/v1`.
    fn v1_fallback() -> Self {
        Self {
            api: ApiCapabilities {
                versions: vec!["v1".into()],
            },
            xplane: XplaneInfo {
                version: Some("12.1.1".into()),
            },
        }
    }

    /// Pick the highest advertised `v#` version.
    pub fn latest_version(&self) -> Option<String> {
        self.api
            .versions
            .iter()
            .filter_map(|v| v.strip_prefix('v')?.parse::<u64>().ok().map(|n| (n, v)))
            .max_by_key(|(n, _)| *n)
            .map(|(_, v)| v.clone())
    }
}

// ── Response envelope ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

// ── RestClient ───────────────────────────────────────────────────────

/// Client for the X-Plane REST API.
///
/// Holds the dataref/command metadata cache for the current connection;
/// the cache must be reloaded whenever a new connection is established
/// (wire ids are reassigned by the simulator).
pub struct RestClient {
    http: reqwest::Client,
    endpoint: ApiEndpoint,
    /// Version actually in use; starts at the configured version and is
    /// replaced by [`negotiate_version`](Self::negotiate_version).
    version: RwLock<String>,
    cache: RwLock<MetaCache>,
}

impl RestClient {
    pub fn new(endpoint: ApiEndpoint, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        let version = RwLock::new(endpoint.version.clone());
        Ok(Self {
            http,
            endpoint,
            version,
            cache: RwLock::new(MetaCache::default()),
        })
    }

    pub fn endpoint(&self) -> &ApiEndpoint {
        &self.endpoint
    }

    /// REST base URL for the negotiated API version.
    pub fn rest_url(&self) -> Result<Url, Error> {
        let version = self.version.read().expect("version lock poisoned").clone();
        self.endpoint.rest_url_for(&version)
    }

    /// WebSocket URL for the negotiated API version.
    pub fn ws_url(&self) -> Result<Url, Error> {
        let version = self.version.read().expect("version lock poisoned").clone();
        Url::parse(&format!(
            "ws://{}:{}{}/{version}",
            self.endpoint.host, self.endpoint.port, self.endpoint.root
        ))
        .map_err(Error::from)
    }

    // ── Reachability & capabilities ──────────────────────────────────

    /// Cheap probe for API reachability.
    ///
    /// Uses `/api/v1/datarefs/count`, present in every API generation,
    /// so the probe works before version negotiation.
    pub async fn is_reachable(&self) -> bool {
        let Ok(url) = self.endpoint.rest_url_for("v1") else {
            return false;
        };
        let probe = format!("{url}/datarefs/count");
        match self.http.get(&probe).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "api unreachable, maybe X-Plane is not running");
                false
            }
        }
    }

    /// Fetch the capabilities document, falling back to a synthetic v1
    /// document for simulators that predate `/api/capabilities`.
    pub async fn capabilities(&self) -> Result<Capabilities, Error> {
        let url = self.endpoint.capabilities_url()?;
        let resp = self.http.get(url.as_str()).send().await?;
        if resp.status().is_success() {
            let body = resp.text().await?;
            return serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body,
            });
        }

        // Pre-12.1.4: no capabilities endpoint, but /api/v1 may exist.
        let probe = format!("{}/datarefs/count", self.endpoint.rest_url_for("v1")?);
        let resp = self.http.get(&probe).send().await?;
        if resp.status().is_success() {
            debug!("no capabilities endpoint, assuming API v1");
            return Ok(Capabilities::v1_fallback());
        }
        Err(Error::Api {
            status: resp.status().as_u16(),
            message: "capabilities unavailable".into(),
        })
    }

    /// Select the newest advertised API version and remember it for all
    /// subsequent URL construction. Logs a warning when the simulator
    /// version is outside the tested range.
    pub fn negotiate_version(&self, caps: &Capabilities) -> Result<String, Error> {
        let version = caps
            .latest_version()
            .ok_or_else(|| Error::NoApiVersion(format!("{:?}", caps.api.versions)))?;
        info!(api = %version, "selected api version");
        *self.version.write().expect("version lock poisoned") = version.clone();

        if let Some(ref xp) = caps.xplane.version {
            match parse_xplane_version(xp) {
                Some(v) if v < XP_MIN_VERSION => {
                    warn!(version = %xp, "X-Plane older than minimum supported 12.1.4, some features may not work");
                }
                Some(v) if v > XP_MAX_VERSION => {
                    warn!(version = %xp, "X-Plane newer than last tested version 12.2.1, some features may not work");
                }
                Some(_) => debug!(version = %xp, "X-Plane version within supported range"),
                None => warn!(version = %xp, "unparseable X-Plane version"),
            }
        }
        Ok(version)
    }

    // ── Metadata cache ───────────────────────────────────────────────

    /// Reload the dataref/command metadata cache from the simulator.
    ///
    /// Returns `(dataref_count, command_count)`.
    pub async fn reload_meta(&self) -> Result<(usize, usize), Error> {
        let base = self.rest_url()?;
        let datarefs: Vec<DatarefMeta> = self.get_data(&format!("{base}/datarefs")).await?;
        let commands: Vec<CommandMeta> = self.get_data(&format!("{base}/commands")).await?;
        let counts = (datarefs.len(), commands.len());
        *self.cache.write().expect("meta cache lock poisoned") = MetaCache::new(datarefs, commands);
        debug!(datarefs = counts.0, commands = counts.1, "metadata cache reloaded");
        Ok(counts)
    }

    pub fn dataref_meta(&self, name: &str) -> Option<DatarefMeta> {
        self.cache
            .read()
            .expect("meta cache lock poisoned")
            .datarefs
            .get_by_name(name)
            .cloned()
    }

    pub fn dataref_meta_by_id(&self, id: i64) -> Option<DatarefMeta> {
        self.cache
            .read()
            .expect("meta cache lock poisoned")
            .datarefs
            .get_by_id(id)
            .cloned()
    }

    pub fn command_meta(&self, name: &str) -> Option<CommandMeta> {
        self.cache
            .read()
            .expect("meta cache lock poisoned")
            .commands
            .get_by_name(name)
            .cloned()
    }

    pub fn command_meta_by_id(&self, id: i64) -> Option<CommandMeta> {
        self.cache
            .read()
            .expect("meta cache lock poisoned")
            .commands
            .get_by_id(id)
            .cloned()
    }

    /// Identifier/name equivalence for log lines.
    pub fn dataref_equiv(&self, id: i64) -> String {
        self.cache
            .read()
            .expect("meta cache lock poisoned")
            .dataref_equiv(id)
    }

    // ── Values & commands ────────────────────────────────────────────

    /// One-shot read of a dataref value (`GET /datarefs/{id}/value`).
    ///
    /// Returns the raw JSON payload; `data`-typed values stay
    /// base64-encoded, decoding is the caller's concern.
    pub async fn dataref_value(&self, meta: &DatarefMeta) -> Result<serde_json::Value, Error> {
        let url = format!("{}/datarefs/{}/value", self.rest_url()?, meta.id);
        self.get_data(&url).await
    }

    /// Write a dataref value (`PATCH /datarefs/{id}/value`).
    ///
    /// `index` narrows the write to a single array element. `data`-typed
    /// payloads must already be base64-encoded.
    pub async fn write_dataref(
        &self,
        meta: &DatarefMeta,
        value: &serde_json::Value,
        index: Option<usize>,
    ) -> Result<(), Error> {
        let mut url = format!("{}/datarefs/{}/value", self.rest_url()?, meta.id);
        if let Some(i) = index {
            url = format!("{url}?index={i}");
        }
        let resp = self
            .http
            .patch(&url)
            .json(&serde_json::json!({ "data": value }))
            .send()
            .await?;
        Self::check_status(resp).await
    }

    /// Activate a command (`POST /command/{id}/activate`).
    pub async fn activate_command(&self, meta: &CommandMeta, duration: f64) -> Result<(), Error> {
        let url = format!("{}/command/{}/activate", self.rest_url()?, meta.id);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "id": meta.id, "duration": duration }))
            .send()
            .await?;
        Self::check_status(resp).await
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn get_data<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, Error> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        let envelope: DataEnvelope<T> =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body,
            })?;
        Ok(envelope.data)
    }

    async fn check_status(resp: reqwest::Response) -> Result<(), Error> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let message = resp.text().await.unwrap_or_default();
        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Parse `"12.1.4"` (optionally with a `-r1` style suffix) into a
/// comparable `(major, minor, patch)` triple.
fn parse_xplane_version(version: &str) -> Option<(u64, u64, u64)> {
    let mut parts = version.split('.').map(|p| {
        let digits: String = p.chars().take_while(char::is_ascii_digit).collect();
        digits.parse::<u64>().ok()
    });
    let major = parts.next()??;
    let minor = parts.next()??;
    let patch = parts.next().flatten().unwrap_or(0);
    Some((major, minor, patch))
}
