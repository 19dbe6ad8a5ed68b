use std::io::{Read as _, Write as _};
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pkgbridge_repotest::auth::Credentials;
use pkgbridge_repotest::index_server::sha256_hex;
use pkgbridge_repotest::tempdir::TempDir;
use pkgbridge_repotest::{RepoServerOptions, ServerKind, ServerRegistry};

fn agent() -> ureq::Agent {
    ureq::Agent::config_builder()
        .proxy(None)
        .http_status_as_error(false)
        .timeout_global(Some(Duration::from_secs(10)))
        .build()
        .into()
}

struct Reply {
    status: u16,
    www_authenticate: Option<String>,
    body: Vec<u8>,
}

fn send(method: &str, url: &str, auth: Option<&Credentials>, body: Option<&[u8]>) -> Reply {
    let agent = agent();
    let auth = auth.map(Credentials::authorization_header);
    let resp = match (method, body) {
        ("GET", _) => {
            let mut req = agent.get(url);
            if let Some(auth) = &auth {
                req = req.header("Authorization", auth);
            }
            req.call()
        }
        ("PUT", Some(body)) => {
            let mut req = agent.put(url);
            if let Some(auth) = &auth {
                req = req.header("Authorization", auth);
            }
            req.send(body)
        }
        ("POST", Some(body)) => {
            let mut req = agent.post(url);
            if let Some(auth) = &auth {
                req = req.header("Authorization", auth);
            }
            req.send(body)
        }
        other => panic!("unsupported request {other:?}"),
    }
    .expect("http request");
    let status = resp.status().as_u16();
    let www_authenticate = resp
        .headers()
        .get("WWW-Authenticate")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut body = Vec::new();
    resp.into_body()
        .into_reader()
        .read_to_end(&mut body)
        .expect("read body");
    Reply {
        status,
        www_authenticate,
        body,
    }
}

fn chart_dir() -> TempDir {
    let dir = TempDir::new("repotest-charts").expect("temp dir");
    std::fs::write(dir.path().join("alpine-0.1.0.tgz"), b"alpine chart").expect("write");
    std::fs::write(dir.path().join("README.md"), b"not a chart").expect("write");
    dir
}

fn glob_for(dir: &Path) -> String {
    format!("{}/*.tgz", dir.display())
}

fn host_port(id: &str) -> String {
    id.trim_start_matches("http://").replace("localhost", "127.0.0.1")
}

fn reachable(id: &str) -> bool {
    TcpStream::connect(host_port(id)).is_ok()
}

#[test]
fn index_server_serves_charts_until_stopped() {
    let charts = chart_dir();
    let registry = ServerRegistry::new();
    let id = registry
        .start_http(&RepoServerOptions {
            glob: glob_for(charts.path()),
            ..Default::default()
        })
        .expect("start");
    assert!(id.starts_with("http://127.0.0.1:"), "id: {id}");
    assert_eq!(registry.kind(&id), Some(ServerKind::Index));

    let index = send("GET", &format!("{id}/index.yaml"), None, None);
    assert_eq!(index.status, 200);
    let index: serde_json::Value = serde_json::from_slice(&index.body).expect("index json");
    assert_eq!(index["entries"]["alpine"][0]["version"], "0.1.0");
    assert_eq!(
        index["entries"]["alpine"][0]["digest"],
        sha256_hex(b"alpine chart")
    );

    let chart = send("GET", &format!("{id}/alpine-0.1.0.tgz"), None, None);
    assert_eq!(chart.status, 200);
    assert_eq!(chart.body, b"alpine chart");

    let missing = send("GET", &format!("{id}/README.md"), None, None);
    assert_eq!(missing.status, 404);

    let workdir = registry.working_dir(&id).expect("working dir");
    assert!(workdir.join("index.yaml").is_file());

    assert!(registry.stop(&id).expect("stop"));
    assert!(!reachable(&id), "listener still open after stop");
    assert!(!workdir.exists(), "working dir left behind");
    assert!(!registry.stop(&id).expect("stop unknown id"));
    assert!(registry.is_empty());
}

#[test]
fn index_server_enforces_basic_auth() {
    let charts = chart_dir();
    let registry = ServerRegistry::new();
    let id = registry
        .start_http(&RepoServerOptions {
            glob: glob_for(charts.path()),
            username: Some("admin".to_string()),
            password: Some("s3cret".to_string()),
        })
        .expect("start");
    let url = format!("{id}/index.yaml");

    let anonymous = send("GET", &url, None, None);
    assert_eq!(anonymous.status, 401);
    assert_eq!(
        anonymous.www_authenticate.as_deref(),
        Some("Basic realm=\"localhost\"")
    );

    let wrong = Credentials::new("admin", "guess");
    assert_eq!(send("GET", &url, Some(&wrong), None).status, 401);

    let right = Credentials::new("admin", "s3cret");
    assert_eq!(send("GET", &url, Some(&right), None).status, 200);

    registry.stop_all().expect("stop all");
}

#[test]
fn index_server_rejects_path_traversal() {
    let registry = ServerRegistry::new();
    let id = registry
        .start_http(&RepoServerOptions::default())
        .expect("start");

    let mut stream = TcpStream::connect(host_port(&id)).expect("connect");
    stream
        .write_all(b"GET /..%2F..%2Fetc%2Fpasswd HTTP/1.1\r\nHost: x\r\n\r\n")
        .expect("write");
    let mut raw = String::new();
    stream.read_to_string(&mut raw).expect("read");
    assert!(raw.starts_with("HTTP/1.1 404"), "response: {raw}");

    registry.stop_all().expect("stop all");
}

#[test]
fn concurrent_starts_get_distinct_addresses() {
    let charts = chart_dir();
    let registry = Arc::new(ServerRegistry::new());
    let glob = glob_for(charts.path());

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let glob = glob.clone();
            thread::spawn(move || {
                registry
                    .start_http(&RepoServerOptions {
                        glob,
                        ..Default::default()
                    })
                    .expect("start")
            })
        })
        .collect();
    let ids: Vec<String> = handles
        .into_iter()
        .map(|h| h.join().expect("start thread"))
        .collect();

    assert_ne!(ids[0], ids[1]);
    assert_eq!(registry.len(), 2);
    for id in &ids {
        assert_eq!(send("GET", &format!("{id}/index.yaml"), None, None).status, 200);
    }
    let dirs: Vec<_> = ids
        .iter()
        .map(|id| registry.working_dir(id).expect("working dir"))
        .collect();

    assert_eq!(registry.stop_all().expect("stop all"), 2);
    assert!(registry.is_empty());
    for id in &ids {
        assert!(!reachable(id), "{id} still reachable");
    }
    for dir in dirs {
        assert!(!dir.exists());
    }
}

#[test]
fn concurrent_stop_and_stop_all_clean_up_once() {
    let registry = Arc::new(ServerRegistry::new());
    let ids: Vec<String> = (0..4)
        .map(|_| {
            registry
                .start_http(&RepoServerOptions::default())
                .expect("start")
        })
        .collect();

    let stopper = {
        let registry = Arc::clone(&registry);
        let ids = ids.clone();
        thread::spawn(move || ids.iter().filter(|id| registry.stop(id).expect("stop")).count())
    };
    let bulk = registry.stop_all().expect("stop all");
    let single = stopper.join().expect("stopper thread");

    assert_eq!(bulk + single, ids.len());
    assert!(registry.is_empty());
}

#[test]
fn oci_registry_accepts_default_credentials_and_pushes() {
    let registry = ServerRegistry::new();
    let id = registry
        .start_oci(&RepoServerOptions::default())
        .expect("start oci");
    assert!(id.starts_with("localhost:"), "id: {id}");
    assert_eq!(registry.kind(&id), Some(ServerKind::Oci));

    let workdir = registry.working_dir(&id).expect("working dir");
    let htpasswd = std::fs::read_to_string(workdir.join("authtest.htpasswd")).expect("htpasswd");
    assert!(htpasswd.starts_with("username:{SSHA256}"), "htpasswd: {htpasswd}");

    let base = format!("http://{}", host_port(&id));
    let anonymous = send("GET", &format!("{base}/v2/"), None, None);
    assert_eq!(anonymous.status, 401);
    assert_eq!(
        anonymous.www_authenticate.as_deref(),
        Some("Basic realm=\"localhost\"")
    );

    let creds = Credentials::new("username", "password");
    assert_eq!(send("GET", &format!("{base}/v2/"), Some(&creds), None).status, 200);

    let layer = b"chart layer bytes".to_vec();
    let digest = format!("sha256:{}", sha256_hex(&layer));
    let pushed = send(
        "POST",
        &format!("{base}/v2/charts/alpine/blobs/uploads/?digest={digest}"),
        Some(&creds),
        Some(&layer),
    );
    assert_eq!(pushed.status, 201);

    let manifest = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "layers": [{ "digest": digest, "size": layer.len() }],
    }))
    .expect("manifest");
    let put = send(
        "PUT",
        &format!("{base}/v2/charts/alpine/manifests/0.1.0"),
        Some(&creds),
        Some(&manifest),
    );
    assert_eq!(put.status, 201);

    let tags = send("GET", &format!("{base}/v2/charts/alpine/tags/list"), Some(&creds), None);
    let tags: serde_json::Value = serde_json::from_slice(&tags.body).expect("tags json");
    assert_eq!(tags["tags"][0], "0.1.0");

    let blob = send(
        "GET",
        &format!("{base}/v2/charts/alpine/blobs/{digest}"),
        Some(&creds),
        None,
    );
    assert_eq!(blob.body, layer);

    assert!(registry.stop(&id).expect("stop"));
    assert!(!reachable(&id));
    assert!(!workdir.exists());
}

#[test]
fn oci_registry_uses_supplied_credentials() {
    let registry = ServerRegistry::new();
    let id = registry
        .start_oci(&RepoServerOptions {
            username: Some("ci".to_string()),
            password: Some("token".to_string()),
            ..Default::default()
        })
        .expect("start oci");
    let url = format!("http://{}/v2/", host_port(&id));

    let defaults = Credentials::new("username", "password");
    assert_eq!(send("GET", &url, Some(&defaults), None).status, 401);
    let supplied = Credentials::new("ci", "token");
    assert_eq!(send("GET", &url, Some(&supplied), None).status, 200);

    assert_eq!(registry.stop_all().expect("stop all"), 1);
}

/// Swaps a server's working directory for a regular file so removing it
/// fails with "not a directory".
fn break_working_dir(dir: &Path) {
    std::fs::remove_dir_all(dir).expect("remove working dir");
    std::fs::write(dir, b"blocker").expect("write blocker");
}

#[cfg(unix)]
#[test]
fn stop_reports_teardown_failures() {
    let registry = ServerRegistry::new();
    let id = registry
        .start_http(&RepoServerOptions::default())
        .expect("start");
    let workdir = registry.working_dir(&id).expect("working dir");
    break_working_dir(&workdir);

    let err = registry.stop(&id).expect_err("stop should fail");
    let message = format!("{err:#}");
    assert!(message.contains(&id), "error: {message}");
    assert!(message.contains("remove temp dir"), "error: {message}");
    assert!(!registry.contains(&id));
    assert!(!reachable(&id), "listener still open after failed teardown");

    std::fs::remove_file(&workdir).expect("cleanup");
}

#[cfg(unix)]
#[test]
fn stop_all_stops_everything_and_reports_failures() {
    let registry = ServerRegistry::new();
    let broken = registry
        .start_http(&RepoServerOptions::default())
        .expect("start");
    let healthy = registry
        .start_oci(&RepoServerOptions::default())
        .expect("start oci");
    let broken_dir = registry.working_dir(&broken).expect("working dir");
    let healthy_dir = registry.working_dir(&healthy).expect("working dir");
    break_working_dir(&broken_dir);

    let err = registry.stop_all().expect_err("stop_all should fail");
    let message = format!("{err:#}");
    assert!(message.contains(&broken), "error: {message}");
    assert!(!message.contains(&healthy), "error: {message}");
    assert!(registry.is_empty());
    assert!(!reachable(&broken));
    assert!(!reachable(&healthy));
    assert!(!healthy_dir.exists());

    std::fs::remove_file(&broken_dir).expect("cleanup");
}
