//! `repr(C)` records crossing the boundary and their conversion into owned
//! option types. Text fields are nul-terminated UTF-8 owned by the caller for
//! the duration of the call; integer flags are true only when `1`.

use std::ffi::{CStr, CString};
use std::ptr;
use std::time::Duration;

use libc::{c_char, c_int};
use pkgbridge_core::options::*;
use pkgbridge_core::Outcome;
use pkgbridge_repotest::RepoServerOptions;

/// Four optional, bridge-allocated strings. Release with `pkgbridge_free`.
#[repr(C)]
#[derive(Debug)]
pub struct bridge_result {
    pub out: *mut c_char,
    pub err: *mut c_char,
    pub std_out: *mut c_char,
    pub std_err: *mut c_char,
}

impl bridge_result {
    pub fn empty() -> Self {
        Self {
            out: ptr::null_mut(),
            err: ptr::null_mut(),
            std_out: ptr::null_mut(),
            std_err: ptr::null_mut(),
        }
    }

    pub fn from_outcome(outcome: Outcome) -> Self {
        Self {
            out: into_c_string(outcome.result),
            err: into_c_string(outcome.error),
            std_out: into_c_string(outcome.stdout),
            std_err: into_c_string(outcome.stderr),
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            err: into_c_string(Some(message.to_string())),
            ..Self::empty()
        }
    }

    /// Frees every non-null field.
    ///
    /// # Safety
    /// Each non-null pointer must come from this crate and not be freed yet.
    pub unsafe fn release(self) {
        for p in [self.out, self.err, self.std_out, self.std_err] {
            if !p.is_null() {
                drop(CString::from_raw(p));
            }
        }
    }
}

fn into_c_string(text: Option<String>) -> *mut c_char {
    let Some(text) = text else {
        return ptr::null_mut();
    };
    let text = if text.contains('\0') {
        text.replace('\0', "\u{FFFD}")
    } else {
        text
    };
    CString::new(text)
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut())
}

/// Null reads as empty; invalid UTF-8 is replaced.
///
/// # Safety
/// `p` is null or points to a nul-terminated string.
pub unsafe fn read_str(p: *const c_char) -> String {
    if p.is_null() {
        return String::new();
    }
    CStr::from_ptr(p).to_string_lossy().into_owned()
}

/// # Safety
/// Same as [`read_str`].
pub unsafe fn read_opt(p: *const c_char) -> Option<String> {
    Some(read_str(p)).filter(|s| !s.is_empty())
}

pub fn flag(v: c_int) -> bool {
    v == 1
}

fn seconds(v: c_int) -> Duration {
    Duration::from_secs(v.max(0) as u64)
}

unsafe fn tls(
    cert_file: *const c_char,
    key_file: *const c_char,
    ca_file: *const c_char,
    insecure_skip_tls_verify: c_int,
    plain_http: c_int,
) -> TlsOptions {
    TlsOptions {
        cert_file: read_str(cert_file),
        key_file: read_str(key_file),
        ca_file: read_str(ca_file),
        insecure_skip_tls_verify: flag(insecure_skip_tls_verify),
        plain_http: flag(plain_http),
    }
}

unsafe fn cluster(
    namespace: *const c_char,
    kube_config: *const c_char,
    kube_config_contents: *const c_char,
) -> ClusterOptions {
    ClusterOptions {
        namespace: read_str(namespace),
        kube_config: read_str(kube_config),
        kube_config_contents: read_str(kube_config_contents),
    }
}

#[repr(C)]
pub struct create_options {
    pub name: *const c_char,
    pub dir: *const c_char,
}

impl create_options {
    pub unsafe fn to_options(&self) -> CreateOptions {
        CreateOptions {
            name: read_str(self.name),
            dir: read_str(self.dir),
        }
    }
}

#[repr(C)]
pub struct dependency_options {
    pub path: *const c_char,
    pub keyring: *const c_char,
    pub skip_refresh: c_int,
    pub verify: c_int,
    pub debug: c_int,
}

impl dependency_options {
    pub unsafe fn to_options(&self) -> DependencyOptions {
        DependencyOptions {
            path: read_str(self.path),
            keyring: read_str(self.keyring),
            skip_refresh: flag(self.skip_refresh),
            verify: flag(self.verify),
            debug: flag(self.debug),
        }
    }
}

#[repr(C)]
pub struct get_values_options {
    pub release_name: *const c_char,
    pub revision: c_int,
    pub all_values: c_int,
    pub output_format: *const c_char,
    pub namespace: *const c_char,
    pub kube_config: *const c_char,
    pub kube_config_contents: *const c_char,
}

impl get_values_options {
    pub unsafe fn to_options(&self) -> GetValuesOptions {
        GetValuesOptions {
            release_name: read_str(self.release_name),
            revision: self.revision,
            all_values: flag(self.all_values),
            output_format: read_str(self.output_format),
            cluster: cluster(self.namespace, self.kube_config, self.kube_config_contents),
        }
    }
}

#[repr(C)]
pub struct history_options {
    pub release_name: *const c_char,
    pub max: c_int,
    pub namespace: *const c_char,
    pub kube_config: *const c_char,
    pub kube_config_contents: *const c_char,
}

impl history_options {
    pub unsafe fn to_options(&self) -> HistoryOptions {
        HistoryOptions {
            release_name: read_str(self.release_name),
            max: self.max,
            cluster: cluster(self.namespace, self.kube_config, self.kube_config_contents),
        }
    }
}

#[repr(C)]
pub struct install_options {
    pub name: *const c_char,
    pub generate_name: c_int,
    pub name_template: *const c_char,
    pub version: *const c_char,
    pub chart: *const c_char,
    pub namespace: *const c_char,
    pub atomic: c_int,
    pub create_namespace: c_int,
    pub description: *const c_char,
    pub devel: c_int,
    pub dependency_update: c_int,
    pub disable_openapi_validation: c_int,
    pub dry_run: c_int,
    pub dry_run_option: *const c_char,
    pub skip_crds: c_int,
    pub wait: c_int,
    pub timeout: c_int,
    pub values: *const c_char,
    pub values_files: *const c_char,
    pub kube_config: *const c_char,
    pub kube_config_contents: *const c_char,
    pub cert_file: *const c_char,
    pub key_file: *const c_char,
    pub ca_file: *const c_char,
    pub insecure_skip_tls_verify: c_int,
    pub plain_http: c_int,
    pub keyring: *const c_char,
    pub debug: c_int,
    pub client_only: c_int,
    pub repository_config: *const c_char,
}

impl install_options {
    pub unsafe fn to_options(&self) -> InstallOptions {
        InstallOptions {
            name: read_str(self.name),
            generate_name: flag(self.generate_name),
            name_template: read_str(self.name_template),
            version: read_str(self.version),
            chart: read_str(self.chart),
            atomic: flag(self.atomic),
            create_namespace: flag(self.create_namespace),
            description: read_str(self.description),
            devel: flag(self.devel),
            dependency_update: flag(self.dependency_update),
            disable_openapi_validation: flag(self.disable_openapi_validation),
            dry_run: flag(self.dry_run),
            dry_run_option: read_str(self.dry_run_option),
            skip_crds: flag(self.skip_crds),
            wait: flag(self.wait),
            timeout: seconds(self.timeout),
            values: read_str(self.values),
            values_files: read_str(self.values_files),
            cluster: cluster(self.namespace, self.kube_config, self.kube_config_contents),
            tls: tls(
                self.cert_file,
                self.key_file,
                self.ca_file,
                self.insecure_skip_tls_verify,
                self.plain_http,
            ),
            keyring: read_str(self.keyring),
            debug: flag(self.debug),
            client_only: flag(self.client_only),
            repository_config: read_str(self.repository_config),
        }
    }
}

#[repr(C)]
pub struct lint_options {
    pub path: *const c_char,
    pub strict: c_int,
    pub quiet: c_int,
}

impl lint_options {
    pub unsafe fn to_options(&self) -> LintOptions {
        LintOptions {
            path: read_str(self.path),
            strict: flag(self.strict),
            quiet: flag(self.quiet),
        }
    }
}

#[repr(C)]
pub struct list_options {
    pub all: c_int,
    pub all_namespaces: c_int,
    pub deployed: c_int,
    pub failed: c_int,
    pub pending: c_int,
    pub superseded: c_int,
    pub uninstalled: c_int,
    pub uninstalling: c_int,
    pub namespace: *const c_char,
    pub kube_config: *const c_char,
    pub kube_config_contents: *const c_char,
}

impl list_options {
    pub unsafe fn to_options(&self) -> ListOptions {
        ListOptions {
            all: flag(self.all),
            all_namespaces: flag(self.all_namespaces),
            deployed: flag(self.deployed),
            failed: flag(self.failed),
            pending: flag(self.pending),
            superseded: flag(self.superseded),
            uninstalled: flag(self.uninstalled),
            uninstalling: flag(self.uninstalling),
            cluster: cluster(self.namespace, self.kube_config, self.kube_config_contents),
        }
    }
}

#[repr(C)]
pub struct package_options {
    pub path: *const c_char,
    pub destination: *const c_char,
    pub sign: c_int,
    pub key: *const c_char,
    pub keyring: *const c_char,
    pub passphrase_file: *const c_char,
}

impl package_options {
    pub unsafe fn to_options(&self) -> PackageOptions {
        PackageOptions {
            path: read_str(self.path),
            destination: read_str(self.destination),
            sign: flag(self.sign),
            key: read_str(self.key),
            keyring: read_str(self.keyring),
            passphrase_file: read_str(self.passphrase_file),
        }
    }
}

#[repr(C)]
pub struct push_options {
    pub chart: *const c_char,
    pub remote: *const c_char,
    pub cert_file: *const c_char,
    pub key_file: *const c_char,
    pub ca_file: *const c_char,
    pub insecure_skip_tls_verify: c_int,
    pub plain_http: c_int,
    pub debug: c_int,
}

impl push_options {
    pub unsafe fn to_options(&self) -> PushOptions {
        PushOptions {
            chart: read_str(self.chart),
            remote: read_str(self.remote),
            tls: tls(
                self.cert_file,
                self.key_file,
                self.ca_file,
                self.insecure_skip_tls_verify,
                self.plain_http,
            ),
            debug: flag(self.debug),
        }
    }
}

#[repr(C)]
pub struct registry_options {
    pub hostname: *const c_char,
    pub username: *const c_char,
    pub password: *const c_char,
    pub cert_file: *const c_char,
    pub key_file: *const c_char,
    pub ca_file: *const c_char,
    pub insecure_skip_tls_verify: c_int,
    pub plain_http: c_int,
    pub debug: c_int,
}

impl registry_options {
    pub unsafe fn to_options(&self) -> RegistryOptions {
        RegistryOptions {
            hostname: read_str(self.hostname),
            username: read_str(self.username),
            password: read_str(self.password),
            tls: tls(
                self.cert_file,
                self.key_file,
                self.ca_file,
                self.insecure_skip_tls_verify,
                self.plain_http,
            ),
            debug: flag(self.debug),
        }
    }
}

#[repr(C)]
pub struct repo_options {
    pub repository_config: *const c_char,
    pub name: *const c_char,
    pub names: *const c_char,
    pub url: *const c_char,
    pub username: *const c_char,
    pub password: *const c_char,
    pub cert_file: *const c_char,
    pub key_file: *const c_char,
    pub ca_file: *const c_char,
    pub insecure_skip_tls_verify: c_int,
}

impl repo_options {
    pub unsafe fn to_options(&self) -> RepoOptions {
        RepoOptions {
            repository_config: read_str(self.repository_config),
            name: read_str(self.name),
            names: read_str(self.names),
            url: read_str(self.url),
            username: read_str(self.username),
            password: read_str(self.password),
            tls: tls(
                self.cert_file,
                self.key_file,
                self.ca_file,
                self.insecure_skip_tls_verify,
                0,
            ),
        }
    }
}

#[repr(C)]
pub struct repo_server_options {
    pub glob: *const c_char,
    pub username: *const c_char,
    pub password: *const c_char,
}

impl repo_server_options {
    pub unsafe fn to_options(&self) -> RepoServerOptions {
        RepoServerOptions {
            glob: read_str(self.glob),
            username: read_opt(self.username),
            password: read_opt(self.password),
        }
    }
}

#[repr(C)]
pub struct search_options {
    pub repository_config: *const c_char,
    pub keyword: *const c_char,
    pub regexp: c_int,
    pub devel: c_int,
    pub version: *const c_char,
}

impl search_options {
    pub unsafe fn to_options(&self) -> SearchOptions {
        SearchOptions {
            repository_config: read_str(self.repository_config),
            keyword: read_str(self.keyword),
            regexp: flag(self.regexp),
            devel: flag(self.devel),
            version: read_str(self.version),
        }
    }
}

#[repr(C)]
pub struct show_options {
    pub path: *const c_char,
    pub output_format: *const c_char,
    pub cert_file: *const c_char,
    pub key_file: *const c_char,
    pub ca_file: *const c_char,
    pub insecure_skip_tls_verify: c_int,
    pub plain_http: c_int,
    pub debug: c_int,
}

impl show_options {
    pub unsafe fn to_options(&self) -> ShowOptions {
        ShowOptions {
            path: read_str(self.path),
            output_format: read_str(self.output_format),
            tls: tls(
                self.cert_file,
                self.key_file,
                self.ca_file,
                self.insecure_skip_tls_verify,
                self.plain_http,
            ),
            debug: flag(self.debug),
        }
    }
}

#[repr(C)]
pub struct status_options {
    pub release_name: *const c_char,
    pub revision: c_int,
    pub namespace: *const c_char,
    pub kube_config: *const c_char,
    pub kube_config_contents: *const c_char,
}

impl status_options {
    pub unsafe fn to_options(&self) -> StatusOptions {
        StatusOptions {
            release_name: read_str(self.release_name),
            revision: self.revision,
            cluster: cluster(self.namespace, self.kube_config, self.kube_config_contents),
        }
    }
}

#[repr(C)]
pub struct template_options {
    pub name: *const c_char,
    pub chart: *const c_char,
    pub namespace: *const c_char,
    pub dependency_update: c_int,
    pub values: *const c_char,
    pub kube_config: *const c_char,
    pub debug: c_int,
}

impl template_options {
    pub unsafe fn to_options(&self) -> TemplateOptions {
        TemplateOptions {
            name: read_str(self.name),
            chart: read_str(self.chart),
            namespace: read_str(self.namespace),
            dependency_update: flag(self.dependency_update),
            values: read_str(self.values),
            kube_config: read_str(self.kube_config),
            debug: flag(self.debug),
        }
    }
}

#[repr(C)]
pub struct test_options {
    pub release_name: *const c_char,
    /// Seconds; `<= 0` selects the configured default.
    pub timeout: c_int,
    pub namespace: *const c_char,
    pub kube_config: *const c_char,
    pub kube_config_contents: *const c_char,
    pub debug: c_int,
}

impl test_options {
    pub unsafe fn to_options(&self) -> TestOptions {
        TestOptions {
            release_name: read_str(self.release_name),
            timeout: seconds(self.timeout),
            cluster: cluster(self.namespace, self.kube_config, self.kube_config_contents),
            debug: flag(self.debug),
        }
    }
}

#[repr(C)]
pub struct uninstall_options {
    pub release_name: *const c_char,
    pub dry_run: c_int,
    pub no_hooks: c_int,
    pub ignore_not_found: c_int,
    pub keep_history: c_int,
    pub cascade: *const c_char,
    pub namespace: *const c_char,
    pub kube_config: *const c_char,
    pub kube_config_contents: *const c_char,
    pub debug: c_int,
}

impl uninstall_options {
    pub unsafe fn to_options(&self) -> UninstallOptions {
        UninstallOptions {
            release_name: read_str(self.release_name),
            dry_run: flag(self.dry_run),
            no_hooks: flag(self.no_hooks),
            ignore_not_found: flag(self.ignore_not_found),
            keep_history: flag(self.keep_history),
            cascade: read_str(self.cascade),
            cluster: cluster(self.namespace, self.kube_config, self.kube_config_contents),
            debug: flag(self.debug),
        }
    }
}

#[repr(C)]
pub struct upgrade_options {
    pub name: *const c_char,
    pub version: *const c_char,
    pub chart: *const c_char,
    pub namespace: *const c_char,
    pub install: c_int,
    pub force: c_int,
    pub reset_values: c_int,
    pub reuse_values: c_int,
    pub reset_then_reuse_values: c_int,
    pub atomic: c_int,
    pub cleanup_on_fail: c_int,
    pub create_namespace: c_int,
    pub description: *const c_char,
    pub devel: c_int,
    pub dependency_update: c_int,
    pub disable_openapi_validation: c_int,
    pub dry_run: c_int,
    pub dry_run_option: *const c_char,
    pub wait: c_int,
    pub timeout: c_int,
    pub values: *const c_char,
    pub values_files: *const c_char,
    pub kube_config: *const c_char,
    pub kube_config_contents: *const c_char,
    pub cert_file: *const c_char,
    pub key_file: *const c_char,
    pub ca_file: *const c_char,
    pub insecure_skip_tls_verify: c_int,
    pub plain_http: c_int,
    pub keyring: *const c_char,
    pub debug: c_int,
    pub client_only: c_int,
    pub repository_config: *const c_char,
}

impl upgrade_options {
    pub unsafe fn to_options(&self) -> UpgradeOptions {
        UpgradeOptions {
            name: read_str(self.name),
            version: read_str(self.version),
            chart: read_str(self.chart),
            install: flag(self.install),
            force: flag(self.force),
            reset_values: flag(self.reset_values),
            reuse_values: flag(self.reuse_values),
            reset_then_reuse_values: flag(self.reset_then_reuse_values),
            atomic: flag(self.atomic),
            cleanup_on_fail: flag(self.cleanup_on_fail),
            create_namespace: flag(self.create_namespace),
            description: read_str(self.description),
            devel: flag(self.devel),
            dependency_update: flag(self.dependency_update),
            disable_openapi_validation: flag(self.disable_openapi_validation),
            dry_run: flag(self.dry_run),
            dry_run_option: read_str(self.dry_run_option),
            wait: flag(self.wait),
            timeout: seconds(self.timeout),
            values: read_str(self.values),
            values_files: read_str(self.values_files),
            cluster: cluster(self.namespace, self.kube_config, self.kube_config_contents),
            tls: tls(
                self.cert_file,
                self.key_file,
                self.ca_file,
                self.insecure_skip_tls_verify,
                self.plain_http,
            ),
            keyring: read_str(self.keyring),
            debug: flag(self.debug),
            client_only: flag(self.client_only),
            repository_config: read_str(self.repository_config),
        }
    }
}
