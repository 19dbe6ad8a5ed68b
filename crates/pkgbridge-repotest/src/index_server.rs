//! A plain chart repository: the files matched by a glob, copied into a temp
//! dir next to a generated `index.yaml`, served over HTTP.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use globset::GlobBuilder;
use serde::Serialize;
use sha2::{Digest as _, Sha256};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::auth::{self, Credentials};
use crate::http::{Request, Response, Server};
use crate::tempdir::TempDir;
use crate::RepoServerOptions;

pub const INDEX_FILE: &str = "index.yaml";

pub struct IndexServer {
    // Declared before `root` so the listener closes before the files go.
    server: Server,
    root: TempDir,
    url: String,
}

impl IndexServer {
    pub fn start(options: &RepoServerOptions) -> Result<Self> {
        let root = TempDir::new("repotest-index")?;
        let files = resolve_glob(&options.glob)?;
        if files.is_empty() {
            warn!(glob = %options.glob, "no files matched, serving an empty repository");
        }
        copy_flat(&files, root.path())?;
        write_index(root.path())?;

        let creds = Credentials::from_parts(options.username.as_deref(), options.password.as_deref());
        let dir = root.path().to_path_buf();
        let server = Server::bind(Arc::new(move |req: &Request| {
            if let Some(expected) = &creds {
                if !auth::check_single(expected, req) {
                    return auth::unauthorized();
                }
            }
            serve_file(&dir, req)
        }))?;
        let url = format!("http://{}", server.addr());
        info!(%url, files = files.len(), "index server started");
        Ok(Self { server, root, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Closes the listener, then removes the content root. Both steps run
    /// even when the first fails.
    pub fn shutdown(mut self) -> Result<()> {
        let listener = self.server.shutdown();
        let files = self.root.close();
        crate::collect_errors([listener, files])
    }
}

fn serve_file(root: &Path, req: &Request) -> Response {
    if req.method != "GET" && req.method != "HEAD" {
        return Response::text(405, "method not allowed\n").with_header("Allow", "GET, HEAD");
    }
    let name = req.path.trim_start_matches('/');
    if name.is_empty() {
        return listing(root);
    }
    if !is_plain_file_name(name) {
        return Response::text(404, "not found\n");
    }
    match std::fs::read(root.join(name)) {
        Ok(body) => Response::new(200).with_body(content_type(name), body),
        Err(_) => Response::text(404, "not found\n"),
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.contains('/') && !name.contains('\\') && name != "." && name != ".."
}

fn listing(root: &Path) -> Response {
    let mut names: Vec<String> = match std::fs::read_dir(root) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    let mut html = String::from("<html><body><ul>\n");
    for name in names {
        html.push_str(&format!("<li><a href=\"/{name}\">{name}</a></li>\n"));
    }
    html.push_str("</ul></body></html>\n");
    Response::new(200).with_body("text/html; charset=utf-8", html.into_bytes())
}

fn content_type(name: &str) -> &'static str {
    if name.ends_with(".yaml") || name.ends_with(".yml") {
        "application/x-yaml"
    } else if name.ends_with(".tgz") || name.ends_with(".gz") {
        "application/gzip"
    } else if name.ends_with(".prov") || name.ends_with(".txt") {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

fn has_glob_meta(component: &str) -> bool {
    component.contains(['*', '?', '[', '{'])
}

/// Splits `dir/sub/*.tgz` into the directory to walk (`dir/sub`) and the
/// pattern to match below it (`*.tgz`). A pattern without metacharacters has
/// no remainder.
pub fn split_glob_base(pattern: &str) -> (PathBuf, Option<String>) {
    let components: Vec<&str> = pattern.split('/').collect();
    let Some(first_meta) = components.iter().position(|c| has_glob_meta(c)) else {
        return (PathBuf::from(pattern), None);
    };
    let base = components[..first_meta].join("/");
    let base = if base.is_empty() && pattern.starts_with('/') {
        PathBuf::from("/")
    } else if base.is_empty() {
        PathBuf::from(".")
    } else {
        PathBuf::from(base)
    };
    (base, Some(components[first_meta..].join("/")))
}

pub fn resolve_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    if pattern.trim().is_empty() {
        return Ok(Vec::new());
    }
    let (base, rest) = split_glob_base(pattern);
    let Some(rest) = rest else {
        return Ok(if base.is_file() { vec![base] } else { Vec::new() });
    };
    if !base.is_dir() {
        return Ok(Vec::new());
    }

    let matcher = GlobBuilder::new(&rest)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid glob: {pattern}"))?
        .compile_matcher();
    let mut walker = WalkDir::new(&base).follow_links(true);
    if !rest.contains("**") {
        walker = walker.max_depth(rest.split('/').count());
    }

    let mut out = Vec::new();
    for ent in walker {
        let ent = ent.with_context(|| format!("walk {}", base.display()))?;
        if !ent.file_type().is_file() {
            continue;
        }
        let Ok(rel) = ent.path().strip_prefix(&base) else {
            continue;
        };
        let Some(rel) = rel.to_str() else {
            continue;
        };
        if matcher.is_match(rel.replace('\\', "/")) {
            out.push(ent.path().to_path_buf());
        }
    }
    out.sort();
    Ok(out)
}

fn copy_flat(files: &[PathBuf], dest: &Path) -> Result<()> {
    for file in files {
        let Some(name) = file.file_name() else {
            continue;
        };
        let target = dest.join(name);
        std::fs::copy(file, &target)
            .with_context(|| format!("copy {} -> {}", file.display(), target.display()))?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct IndexFile {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    entries: BTreeMap<String, Vec<IndexEntry>>,
}

#[derive(Debug, Serialize)]
struct IndexEntry {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    name: String,
    version: String,
    digest: String,
    urls: Vec<String>,
}

/// Splits `<name>-<version>.tgz` at the first `-` followed by a digit (or `v`
/// and a digit).
pub fn parse_archive_name(file_name: &str) -> Option<(String, String)> {
    let stem = file_name.strip_suffix(".tgz")?;
    let bytes = stem.as_bytes();
    for (idx, _) in stem.match_indices('-') {
        let after = &bytes[idx + 1..];
        let starts_version = match after {
            [b'v', d, ..] => d.is_ascii_digit(),
            [d, ..] => d.is_ascii_digit(),
            [] => false,
        };
        if starts_version && idx > 0 {
            return Some((stem[..idx].to_string(), stem[idx + 1..].to_string()));
        }
    }
    None
}

/// Writes `index.yaml` (as JSON, which YAML parsers accept) for every chart
/// archive in `root`.
pub fn write_index(root: &Path) -> Result<()> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .with_context(|| format!("read dir: {}", root.display()))?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();

    let mut entries: BTreeMap<String, Vec<IndexEntry>> = BTreeMap::new();
    for file in names {
        let Some((name, version)) = parse_archive_name(&file) else {
            continue;
        };
        let path = root.join(&file);
        let bytes = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        entries.entry(name.clone()).or_default().push(IndexEntry {
            api_version: "v2",
            name,
            version,
            digest: sha256_hex(&bytes),
            urls: vec![file],
        });
    }

    let index = IndexFile {
        api_version: "v1",
        entries,
    };
    let mut out = serde_json::to_vec_pretty(&index)?;
    out.push(b'\n');
    let path = root.join(INDEX_FILE);
    std::fs::write(&path, out).with_context(|| format!("write {}", path.display()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    let digest = h.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
