//! HTTP basic auth and the htpasswd credential file used by the OCI server.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest as _, Sha256};

use crate::http::{Request, Response};

pub const REALM: &str = "localhost";

const SSHA256_PREFIX: &str = "{SSHA256}";
const SALT_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both halves must be present and non-empty.
    pub fn from_parts(username: Option<&str>, password: Option<&str>) -> Option<Self> {
        match (username, password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some(Self::new(u, p)),
            _ => None,
        }
    }

    pub fn authorization_header(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

/// Parses an `Authorization: Basic ...` header value.
pub fn parse_basic(header: &str) -> Option<Credentials> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(token.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(Credentials::new(username, password))
}

pub fn request_credentials(req: &Request) -> Option<Credentials> {
    req.header("Authorization").and_then(parse_basic)
}

pub fn challenge_header() -> String {
    format!("Basic realm=\"{REALM}\"")
}

pub fn unauthorized() -> Response {
    Response::text(401, "Unauthorized\n").with_header("WWW-Authenticate", challenge_header())
}

/// Accepts only the one configured user.
pub fn check_single(expected: &Credentials, req: &Request) -> bool {
    match request_credentials(req) {
        Some(got) => {
            constant_time_eq(got.username.as_bytes(), expected.username.as_bytes())
                & constant_time_eq(got.password.as_bytes(), expected.password.as_bytes())
        }
        None => false,
    }
}

/// `user:{SSHA256}base64(sha256(password || salt) || salt)` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Htpasswd {
    entries: BTreeMap<String, String>,
}

impl Htpasswd {
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((user, hash)) = line.split_once(':') else {
                anyhow::bail!("htpasswd line {}: missing ':'", idx + 1);
            };
            entries.insert(user.to_string(), hash.to_string());
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read htpasswd: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parse htpasswd: {}", path.display()))
    }

    pub fn write_entry(path: &Path, creds: &Credentials) -> Result<()> {
        if creds.username.contains([':', '\n', '\r']) {
            anyhow::bail!("htpasswd user name {:?} must not contain ':' or line breaks", creds.username);
        }
        let line = format!("{}:{}\n", creds.username, hash_password(&creds.password)?);
        std::fs::write(path, line).with_context(|| format!("write htpasswd: {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn verify(&self, creds: &Credentials) -> bool {
        self.entries
            .get(&creds.username)
            .is_some_and(|hash| verify_password(hash, &creds.password))
    }

    pub fn check(&self, req: &Request) -> bool {
        request_credentials(req).is_some_and(|creds| self.verify(&creds))
    }
}

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    getrandom::getrandom(&mut salt).map_err(|e| anyhow::anyhow!("getrandom: {e}"))?;
    Ok(hash_with_salt(password, &salt))
}

fn hash_with_salt(password: &str, salt: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(password.as_bytes());
    h.update(salt);
    let mut raw = h.finalize().to_vec();
    raw.extend_from_slice(salt);
    format!("{SSHA256_PREFIX}{}", STANDARD.encode(raw))
}

pub fn verify_password(stored: &str, password: &str) -> bool {
    let Some(encoded) = stored.strip_prefix(SSHA256_PREFIX) else {
        return false;
    };
    let Ok(raw) = STANDARD.decode(encoded) else {
        return false;
    };
    if raw.len() <= 32 {
        return false;
    }
    let (_, salt) = raw.split_at(32);
    constant_time_eq(hash_with_salt(password, salt).as_bytes(), stored.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
