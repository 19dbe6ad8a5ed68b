use std::ffi::{CStr, CString};
use std::io::Write as _;
use std::ptr;
use std::sync::{Arc, Once};

use anyhow::{bail, Result};
use libc::c_char;
use pkgbridge::ffi::*;
use pkgbridge::*;
use pkgbridge_core::backend::{self, ActionLogs, LintReport, PackageManager};
use pkgbridge_core::options::{InstallOptions, LintOptions, RepoOptions, StatusOptions};

struct Scripted;

impl PackageManager for Scripted {
    fn install(&self, options: &InstallOptions, logs: &mut ActionLogs) -> Result<String> {
        let mut out = std::io::stdout();
        out.write_all(b"downloading chart\n").expect("write");
        logs.cluster = "creating 2 resource(s)".to_string();
        match options.chart.as_str() {
            "boom" => panic!("backend exploded"),
            "missing" => bail!("chart \"missing\" not found"),
            _ => Ok(format!(
                "{}|{}|{}|{}|{}",
                options.name,
                options.version,
                options.dry_run_option,
                options.timeout.as_secs(),
                options.tls.insecure_skip_tls_verify
            )),
        }
    }

    fn lint(&self, options: &LintOptions) -> Result<LintReport> {
        Ok(LintReport {
            messages: vec![format!("==> Linting {}", options.path)],
            failed: false,
        })
    }

    fn repo_remove(&self, options: &RepoOptions) -> Result<()> {
        let mut err = std::io::stderr();
        err.write_all(b"removing repositories\n").expect("write");
        if options.name_list().is_empty() {
            bail!("no repository names given");
        }
        Ok(())
    }

    fn status(&self, options: &StatusOptions, _logs: &mut ActionLogs) -> Result<String> {
        Ok(format!(
            "{}@{} in {}",
            options.release_name, options.revision, options.cluster.namespace
        ))
    }

    fn version(&self) -> Result<String> {
        Ok("v3.14.0".to_string())
    }
}

fn setup() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| backend::register(Arc::new(Scripted)));
}

fn text(p: *mut c_char) -> Option<String> {
    if p.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
}

struct Returned {
    out: Option<String>,
    err: Option<String>,
    std_out: Option<String>,
    std_err: Option<String>,
}

fn take(result: bridge_result) -> Returned {
    let returned = Returned {
        out: text(result.out),
        err: text(result.err),
        std_out: text(result.std_out),
        std_err: text(result.std_err),
    };
    unsafe { pkgbridge_free(result) };
    returned
}

fn zeroed<T>() -> T {
    // Every record is pointers and ints, for which all-zero means null/0.
    unsafe { std::mem::zeroed() }
}

#[test]
fn null_options_are_reported_as_errors() {
    let got = take(pkgbridge_install(ptr::null()));
    assert_eq!(got.err.as_deref(), Some("install: options must not be null"));
    assert!(got.out.is_none());
    assert!(got.std_out.is_none());
    assert!(got.std_err.is_none());

    let got = take(pkgbridge_repo_server_start(ptr::null()));
    assert_eq!(
        got.err.as_deref(),
        Some("repo_server_start: options must not be null")
    );
}

#[test]
fn install_reads_fields_and_applies_defaults() {
    setup();
    let name = CString::new("web").expect("cstring");
    let chart = CString::new("./charts/web").expect("cstring");
    let mut opts: install_options = zeroed();
    opts.name = name.as_ptr();
    opts.chart = chart.as_ptr();
    opts.devel = 1;
    opts.timeout = 45;
    opts.insecure_skip_tls_verify = 2;

    let got = take(pkgbridge_install(&opts));
    assert_eq!(got.err, None);
    let out = got.out.expect("output");
    assert!(
        out.starts_with("web|>0.0.0-0|none|45|false"),
        "output: {out}"
    );
    assert!(out.contains("---\ncreating 2 resource(s)"), "output: {out}");
    assert!(
        got.std_out.as_deref().unwrap_or("").contains("downloading chart"),
        "stdout: {:?}",
        got.std_out
    );
}

#[test]
fn install_failure_moves_logs_to_the_error() {
    setup();
    let chart = CString::new("missing").expect("cstring");
    let mut opts: install_options = zeroed();
    opts.chart = chart.as_ptr();
    opts.timeout = -5;

    let got = take(pkgbridge_install(&opts));
    assert_eq!(got.out, None);
    let err = got.err.expect("error");
    assert!(err.starts_with("chart \"missing\" not found"), "error: {err}");
    assert!(err.contains("creating 2 resource(s)"), "error: {err}");
}

#[test]
fn backend_panic_becomes_an_error() {
    setup();
    let chart = CString::new("boom").expect("cstring");
    let mut opts: install_options = zeroed();
    opts.chart = chart.as_ptr();

    let got = take(pkgbridge_install(&opts));
    assert_eq!(got.out, None);
    assert!(
        got.err.as_deref().unwrap_or("").contains("backend exploded"),
        "error: {:?}",
        got.err
    );
    assert!(got
        .std_out
        .as_deref()
        .unwrap_or("")
        .contains("downloading chart"));
}

#[test]
fn lint_reports_messages_and_outcome() {
    setup();
    let path = CString::new("charts/web").expect("cstring");
    let mut opts: lint_options = zeroed();
    opts.path = path.as_ptr();

    let got = take(pkgbridge_lint(&opts));
    assert_eq!(got.err, None);
    assert_eq!(
        got.out.as_deref(),
        Some("==> Linting charts/web\nFailed: false")
    );
}

#[test]
fn repo_remove_returns_no_text_but_keeps_stderr() {
    setup();
    let names = CString::new("stable,incubator").expect("cstring");
    let mut opts: repo_options = zeroed();
    opts.names = names.as_ptr();

    let got = take(pkgbridge_repo_remove(&opts));
    assert_eq!(got.out, None);
    assert_eq!(got.err, None);
    assert!(got
        .std_err
        .as_deref()
        .unwrap_or("")
        .contains("removing repositories"));

    let empty: repo_options = zeroed();
    let got = take(pkgbridge_repo_remove(&empty));
    assert_eq!(got.err.as_deref(), Some("no repository names given"));
}

#[test]
fn status_passes_cluster_fields() {
    setup();
    let release = CString::new("web").expect("cstring");
    let namespace = CString::new("prod").expect("cstring");
    let mut opts: status_options = zeroed();
    opts.release_name = release.as_ptr();
    opts.revision = 3;
    opts.namespace = namespace.as_ptr();

    let got = take(pkgbridge_status(&opts));
    assert_eq!(got.out.as_deref(), Some("web@3 in prod"));
}

#[test]
fn operations_without_backend_support_fail_cleanly() {
    setup();
    let opts: history_options = zeroed();
    let got = take(pkgbridge_history(&opts));
    assert_eq!(got.out, None);
    assert!(
        got.err.as_deref().unwrap_or("").contains("history is not available"),
        "error: {:?}",
        got.err
    );
}

#[test]
fn version_comes_from_the_backend() {
    setup();
    let got = take(pkgbridge_version());
    assert_eq!(got.out.as_deref(), Some("v3.14.0"));
    assert_eq!(got.err, None);
}

#[test]
fn freeing_an_empty_result_is_a_no_op() {
    unsafe { pkgbridge_free(bridge_result::empty()) };
}
