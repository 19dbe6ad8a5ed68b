//! An in-memory OCI distribution (v2) registry guarded by htpasswd basic auth.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::auth::{self, Credentials, Htpasswd};
use crate::http::{Request, Response, Server};
use crate::index_server::sha256_hex;
use crate::tempdir::TempDir;
use crate::RepoServerOptions;

pub const DEFAULT_USERNAME: &str = "username";
pub const DEFAULT_PASSWORD: &str = "password";
pub const HTPASSWD_FILE: &str = "authtest.htpasswd";

const API_VERSION_HEADER: &str = "Docker-Distribution-API-Version";
const API_VERSION: &str = "registry/2.0";
const DIGEST_HEADER: &str = "Docker-Content-Digest";
const DEFAULT_MANIFEST_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
const INDEX_TYPES: [&str; 2] = [
    "application/vnd.oci.image.index.v1+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
];

pub struct OciServer {
    server: Server,
    dir: TempDir,
    id: String,
}

impl OciServer {
    pub fn start(options: &RepoServerOptions) -> Result<Self> {
        let credentials = Credentials::new(
            non_empty(options.username.as_deref()).unwrap_or(DEFAULT_USERNAME),
            non_empty(options.password.as_deref()).unwrap_or(DEFAULT_PASSWORD),
        );
        let dir = TempDir::new("repotest-oci")?;
        let htpasswd_path = dir.path().join(HTPASSWD_FILE);
        Htpasswd::write_entry(&htpasswd_path, &credentials)?;
        let htpasswd = Htpasswd::load(&htpasswd_path)?;

        let registry = Arc::new(Registry::new(htpasswd));
        let server = Server::bind(Arc::new(move |req: &Request| registry.handle(req)))?;
        let id = format!("localhost:{}", server.port());
        info!(%id, "oci registry started");
        Ok(Self { server, dir, id })
    }

    /// `localhost:<port>`, the form clients log in and push to.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Closes the listener, then removes the working directory. Both steps
    /// run even when the first fails.
    pub fn shutdown(mut self) -> Result<()> {
        let listener = self.server.shutdown();
        let files = self.dir.close();
        crate::collect_errors([listener, files])
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Serialize)]
struct ErrorEntry {
    code: &'static str,
    message: String,
    detail: serde_json::Value,
}

fn oci_error(status: u16, code: &'static str, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        errors: vec![ErrorEntry {
            code,
            message: message.into(),
            detail: serde_json::Value::Null,
        }],
    };
    Response::json(status, &body)
}

#[derive(Debug, Clone)]
struct Manifest {
    media_type: String,
    body: Vec<u8>,
}

#[derive(Debug, Default)]
struct Repository {
    manifests: HashMap<String, Manifest>,
    tags: BTreeMap<String, String>,
    blobs: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Store {
    blobs: HashMap<String, Vec<u8>>,
    repos: BTreeMap<String, Repository>,
    uploads: HashMap<String, Upload>,
}

#[derive(Debug)]
struct Upload {
    repo: String,
    data: Vec<u8>,
}

struct Registry {
    htpasswd: Htpasswd,
    store: Mutex<Store>,
}

/// What a `/v2/...` path addresses.
#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Ping,
    Catalog,
    Tags(&'a str),
    Manifest(&'a str, &'a str),
    Blob(&'a str, &'a str),
    Upload(&'a str, Option<&'a str>),
}

fn parse_route(path: &str) -> Option<Route<'_>> {
    let rest = path.strip_prefix("/v2")?;
    if rest.is_empty() || rest == "/" {
        return Some(Route::Ping);
    }
    let rest = rest.strip_prefix('/')?;
    if rest == "_catalog" {
        return Some(Route::Catalog);
    }
    if let Some(name) = rest.strip_suffix("/tags/list") {
        return valid_name(name).then_some(Route::Tags(name));
    }
    if let Some((name, id)) = rest.rsplit_once("/blobs/uploads") {
        let id = id.trim_start_matches('/');
        return valid_name(name).then_some(Route::Upload(name, (!id.is_empty()).then_some(id)));
    }
    if let Some((name, reference)) = rest.rsplit_once("/manifests/") {
        return (valid_name(name) && !reference.is_empty())
            .then_some(Route::Manifest(name, reference));
    }
    if let Some((name, digest)) = rest.rsplit_once("/blobs/") {
        return (valid_name(name) && !digest.is_empty()).then_some(Route::Blob(name, digest));
    }
    None
}

/// Lowercase path components of `[a-z0-9]` runs joined by `.`, `_`, `__` or `-`.
fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('/').all(|component| {
            let bytes = component.as_bytes();
            !bytes.is_empty()
                && bytes[0].is_ascii_alphanumeric()
                && bytes[bytes.len() - 1].is_ascii_alphanumeric()
                && bytes.iter().all(|b| {
                    b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-')
                })
        })
}

fn is_digest(reference: &str) -> bool {
    reference.contains(':')
}

/// Only sha256 is supported.
fn verify_digest(expected: &str, data: &[u8]) -> Result<String, Response> {
    let Some(hex) = expected.strip_prefix("sha256:") else {
        return Err(oci_error(
            400,
            "DIGEST_INVALID",
            format!("unsupported digest algorithm: {expected}"),
        ));
    };
    let actual = sha256_hex(data);
    if hex != actual {
        return Err(oci_error(
            400,
            "DIGEST_INVALID",
            format!("digest mismatch: expected {expected}, got sha256:{actual}"),
        ));
    }
    Ok(format!("sha256:{actual}"))
}

fn new_upload_id() -> Result<String> {
    let mut raw = [0u8; 16];
    getrandom::getrandom(&mut raw).map_err(|e| anyhow::anyhow!("getrandom: {e}"))?;
    Ok(raw.iter().map(|b| format!("{b:02x}")).collect())
}

impl Registry {
    fn new(htpasswd: Htpasswd) -> Self {
        Self {
            htpasswd,
            store: Mutex::new(Store::default()),
        }
    }

    fn handle(&self, req: &Request) -> Response {
        if !self.htpasswd.check(req) {
            return oci_error(401, "UNAUTHORIZED", "authentication required")
                .with_header("WWW-Authenticate", auth::challenge_header())
                .with_header(API_VERSION_HEADER, API_VERSION);
        }
        let Some(route) = parse_route(&req.path) else {
            return oci_error(404, "NAME_INVALID", format!("invalid path: {}", req.path));
        };
        let method = req.method.as_str();
        let resp = match (route, method) {
            (Route::Ping, "GET" | "HEAD") => Response::json(200, &serde_json::json!({})),
            (Route::Catalog, "GET") => self.catalog(),
            (Route::Tags(name), "GET") => self.tags(name),
            (Route::Manifest(name, reference), "GET" | "HEAD") => self.get_manifest(name, reference),
            (Route::Manifest(name, reference), "PUT") => self.put_manifest(name, reference, req),
            (Route::Manifest(name, reference), "DELETE") => self.delete_manifest(name, reference),
            (Route::Blob(name, digest), "GET" | "HEAD") => self.get_blob(name, digest),
            (Route::Blob(name, digest), "DELETE") => self.delete_blob(name, digest),
            (Route::Upload(name, None), "POST") => self.start_upload(name, req),
            (Route::Upload(name, Some(id)), "PATCH") => self.patch_upload(name, id, req),
            (Route::Upload(name, Some(id)), "PUT") => self.finish_upload(name, id, req),
            (Route::Upload(name, Some(id)), "GET") => self.upload_status(name, id),
            (Route::Upload(_, Some(id)), "DELETE") => self.cancel_upload(id),
            _ => oci_error(405, "UNSUPPORTED", format!("{method} not supported on {}", req.path)),
        };
        resp.with_header(API_VERSION_HEADER, API_VERSION)
    }

    fn catalog(&self) -> Response {
        let store = self.store.lock();
        let repositories: Vec<&String> = store.repos.keys().collect();
        Response::json(200, &serde_json::json!({ "repositories": repositories }))
    }

    fn tags(&self, name: &str) -> Response {
        let store = self.store.lock();
        let Some(repo) = store.repos.get(name) else {
            return oci_error(404, "NAME_UNKNOWN", format!("repository {name} not known"));
        };
        let tags: Vec<&String> = repo.tags.keys().collect();
        Response::json(200, &serde_json::json!({ "name": name, "tags": tags }))
    }

    fn get_manifest(&self, name: &str, reference: &str) -> Response {
        let store = self.store.lock();
        let found = store.repos.get(name).and_then(|repo| {
            let digest = if is_digest(reference) {
                reference.to_string()
            } else {
                repo.tags.get(reference)?.clone()
            };
            repo.manifests.get(&digest).map(|m| (digest, m.clone()))
        });
        match found {
            Some((digest, manifest)) => Response::new(200)
                .with_body(&manifest.media_type, manifest.body)
                .with_header(DIGEST_HEADER, digest),
            None => oci_error(404, "MANIFEST_UNKNOWN", format!("manifest unknown: {name}:{reference}")),
        }
    }

    fn put_manifest(&self, name: &str, reference: &str, req: &Request) -> Response {
        let digest = format!("sha256:{}", sha256_hex(&req.body));
        if is_digest(reference) && reference != digest {
            return oci_error(
                400,
                "DIGEST_INVALID",
                format!("manifest digest {digest} does not match {reference}"),
            );
        }
        let parsed: serde_json::Value = match serde_json::from_slice(&req.body) {
            Ok(v) => v,
            Err(err) => return oci_error(400, "MANIFEST_INVALID", format!("manifest is not json: {err}")),
        };
        let media_type = req
            .header("Content-Type")
            .map(str::to_string)
            .or_else(|| parsed["mediaType"].as_str().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_MANIFEST_TYPE.to_string());

        let mut store = self.store.lock();
        if !INDEX_TYPES.contains(&media_type.as_str()) {
            let known = store.repos.get(name);
            let referenced = parsed["config"]["digest"]
                .as_str()
                .into_iter()
                .chain(
                    parsed["layers"]
                        .as_array()
                        .into_iter()
                        .flatten()
                        .filter_map(|l| l["digest"].as_str()),
                );
            for blob in referenced {
                if !known.is_some_and(|repo| repo.blobs.contains(blob)) {
                    return oci_error(
                        400,
                        "MANIFEST_BLOB_UNKNOWN",
                        format!("blob unknown to registry: {blob}"),
                    );
                }
            }
        }
        let repo = store.repos.entry(name.to_string()).or_default();
        repo.manifests.insert(
            digest.clone(),
            Manifest {
                media_type,
                body: req.body.clone(),
            },
        );
        if !is_digest(reference) {
            repo.tags.insert(reference.to_string(), digest.clone());
        }
        debug!(%name, %reference, %digest, "manifest stored");
        Response::new(201)
            .with_header("Location", format!("/v2/{name}/manifests/{digest}"))
            .with_header(DIGEST_HEADER, digest)
    }

    fn delete_manifest(&self, name: &str, reference: &str) -> Response {
        let mut store = self.store.lock();
        let Some(repo) = store.repos.get_mut(name) else {
            return oci_error(404, "NAME_UNKNOWN", format!("repository {name} not known"));
        };
        if is_digest(reference) {
            if repo.manifests.remove(reference).is_none() {
                return oci_error(404, "MANIFEST_UNKNOWN", format!("manifest unknown: {reference}"));
            }
            repo.tags.retain(|_, d| d != reference);
        } else if repo.tags.remove(reference).is_none() {
            return oci_error(404, "MANIFEST_UNKNOWN", format!("tag unknown: {reference}"));
        }
        Response::new(202)
    }

    fn get_blob(&self, name: &str, digest: &str) -> Response {
        let store = self.store.lock();
        let linked = store
            .repos
            .get(name)
            .is_some_and(|repo| repo.blobs.contains(digest));
        match store.blobs.get(digest).filter(|_| linked) {
            Some(data) => Response::new(200)
                .with_body("application/octet-stream", data.clone())
                .with_header(DIGEST_HEADER, digest),
            None => oci_error(404, "BLOB_UNKNOWN", format!("blob unknown: {digest}")),
        }
    }

    fn delete_blob(&self, name: &str, digest: &str) -> Response {
        let mut store = self.store.lock();
        let removed = store
            .repos
            .get_mut(name)
            .is_some_and(|repo| repo.blobs.remove(digest));
        if removed {
            Response::new(202)
        } else {
            oci_error(404, "BLOB_UNKNOWN", format!("blob unknown: {digest}"))
        }
    }

    fn link_blob(store: &mut Store, name: &str, digest: &str, data: Vec<u8>) {
        store.blobs.entry(digest.to_string()).or_insert(data);
        store
            .repos
            .entry(name.to_string())
            .or_default()
            .blobs
            .insert(digest.to_string());
    }

    fn blob_created(name: &str, digest: &str) -> Response {
        Response::new(201)
            .with_header("Location", format!("/v2/{name}/blobs/{digest}"))
            .with_header(DIGEST_HEADER, digest)
    }

    fn start_upload(&self, name: &str, req: &Request) -> Response {
        if let (Some(mount), Some(from)) = (req.query_param("mount"), req.query_param("from")) {
            let mut store = self.store.lock();
            let available = store
                .repos
                .get(from)
                .is_some_and(|repo| repo.blobs.contains(mount))
                && store.blobs.contains_key(mount);
            if available {
                Self::link_blob(&mut store, name, mount, Vec::new());
                return Self::blob_created(name, mount);
            }
        }

        if let Some(expected) = req.query_param("digest") {
            let digest = match verify_digest(expected, &req.body) {
                Ok(digest) => digest,
                Err(resp) => return resp,
            };
            let mut store = self.store.lock();
            Self::link_blob(&mut store, name, &digest, req.body.clone());
            return Self::blob_created(name, &digest);
        }

        let id = match new_upload_id() {
            Ok(id) => id,
            Err(err) => return oci_error(500, "UNKNOWN", format!("{err:#}")),
        };
        let len = req.body.len();
        self.store.lock().uploads.insert(
            id.clone(),
            Upload {
                repo: name.to_string(),
                data: req.body.clone(),
            },
        );
        upload_accepted(name, &id, len, 202)
    }

    fn patch_upload(&self, name: &str, id: &str, req: &Request) -> Response {
        let mut store = self.store.lock();
        match store.uploads.get_mut(id).filter(|u| u.repo == name) {
            Some(upload) => {
                upload.data.extend_from_slice(&req.body);
                upload_accepted(name, id, upload.data.len(), 202)
            }
            None => upload_unknown(id),
        }
    }

    fn finish_upload(&self, name: &str, id: &str, req: &Request) -> Response {
        let Some(expected) = req.query_param("digest") else {
            return oci_error(400, "DIGEST_INVALID", "digest query parameter is required");
        };
        let mut store = self.store.lock();
        let Some(mut upload) = store.uploads.remove(id).filter(|u| u.repo == name) else {
            return upload_unknown(id);
        };
        upload.data.extend_from_slice(&req.body);
        let digest = match verify_digest(expected, &upload.data) {
            Ok(digest) => digest,
            Err(resp) => return resp,
        };
        Self::link_blob(&mut store, name, &digest, upload.data);
        Self::blob_created(name, &digest)
    }

    fn upload_status(&self, name: &str, id: &str) -> Response {
        let store = self.store.lock();
        match store.uploads.get(id).filter(|u| u.repo == name) {
            Some(upload) => upload_accepted(name, id, upload.data.len(), 204),
            None => upload_unknown(id),
        }
    }

    fn cancel_upload(&self, id: &str) -> Response {
        match self.store.lock().uploads.remove(id) {
            Some(_) => Response::new(204),
            None => upload_unknown(id),
        }
    }
}

fn upload_accepted(name: &str, id: &str, len: usize, status: u16) -> Response {
    Response::new(status)
        .with_header("Location", format!("/v2/{name}/blobs/uploads/{id}"))
        .with_header("Docker-Upload-UUID", id)
        .with_header("Range", format!("0-{}", len.saturating_sub(1)))
}

fn upload_unknown(id: &str) -> Response {
    oci_error(404, "BLOB_UPLOAD_UNKNOWN", format!("upload unknown: {id}"))
}
