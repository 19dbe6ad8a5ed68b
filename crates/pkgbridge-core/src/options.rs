//! Owned, validated-by-type option sets handed to the package-management
//! backend. The native crate builds these from the foreign records.

use std::time::Duration;

pub const DEVEL_VERSION_CONSTRAINT: &str = ">0.0.0-0";
pub const DEFAULT_DRY_RUN_OPTION: &str = "none";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    pub cert_file: String,
    pub key_file: String,
    pub ca_file: String,
    pub insecure_skip_tls_verify: bool,
    pub plain_http: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterOptions {
    pub namespace: String,
    pub kube_config: String,
    pub kube_config_contents: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    pub name: String,
    pub dir: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyOptions {
    pub path: String,
    pub keyring: String,
    pub skip_refresh: bool,
    pub verify: bool,
    pub debug: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetValuesOptions {
    pub release_name: String,
    pub revision: i32,
    pub all_values: bool,
    pub output_format: String,
    pub cluster: ClusterOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryOptions {
    pub release_name: String,
    pub max: i32,
    pub cluster: ClusterOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOptions {
    pub name: String,
    pub generate_name: bool,
    pub name_template: String,
    pub version: String,
    pub chart: String,
    pub atomic: bool,
    pub create_namespace: bool,
    pub description: String,
    pub devel: bool,
    pub dependency_update: bool,
    pub disable_openapi_validation: bool,
    pub dry_run: bool,
    pub dry_run_option: String,
    pub skip_crds: bool,
    pub wait: bool,
    pub timeout: Duration,
    pub values: String,
    pub values_files: String,
    pub cluster: ClusterOptions,
    pub tls: TlsOptions,
    pub keyring: String,
    pub debug: bool,
    /// Render without contacting the cluster, even for dry runs.
    pub client_only: bool,
    pub repository_config: String,
}

impl InstallOptions {
    /// Fills in the defaults the bridge owns rather than the backend.
    pub fn normalized(mut self) -> Self {
        if self.version.is_empty() && self.devel {
            self.version = DEVEL_VERSION_CONSTRAINT.to_string();
        }
        if self.dry_run_option.is_empty() {
            self.dry_run_option = DEFAULT_DRY_RUN_OPTION.to_string();
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LintOptions {
    pub path: String,
    pub strict: bool,
    pub quiet: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub all: bool,
    pub all_namespaces: bool,
    pub deployed: bool,
    pub failed: bool,
    pub pending: bool,
    pub superseded: bool,
    pub uninstalled: bool,
    pub uninstalling: bool,
    pub cluster: ClusterOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageOptions {
    pub path: String,
    pub destination: String,
    pub sign: bool,
    pub key: String,
    pub keyring: String,
    pub passphrase_file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOptions {
    pub chart: String,
    pub remote: String,
    pub tls: TlsOptions,
    pub debug: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryOptions {
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub tls: TlsOptions,
    pub debug: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoOptions {
    pub repository_config: String,
    pub name: String,
    /// Comma separated, used by remove and update.
    pub names: String,
    pub url: String,
    pub username: String,
    pub password: String,
    pub tls: TlsOptions,
}

impl RepoOptions {
    pub fn name_list(&self) -> Vec<String> {
        self.names
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub repository_config: String,
    pub keyword: String,
    pub regexp: bool,
    pub devel: bool,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShowOptions {
    pub path: String,
    pub output_format: String,
    pub tls: TlsOptions,
    pub debug: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusOptions {
    pub release_name: String,
    pub revision: i32,
    pub cluster: ClusterOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateOptions {
    pub name: String,
    pub chart: String,
    pub namespace: String,
    pub dependency_update: bool,
    pub values: String,
    pub kube_config: String,
    pub debug: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestOptions {
    pub release_name: String,
    pub timeout: Duration,
    pub cluster: ClusterOptions,
    pub debug: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallOptions {
    pub release_name: String,
    pub dry_run: bool,
    pub no_hooks: bool,
    pub ignore_not_found: bool,
    pub keep_history: bool,
    pub cascade: String,
    pub cluster: ClusterOptions,
    pub debug: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeOptions {
    pub name: String,
    pub version: String,
    pub chart: String,
    pub install: bool,
    pub force: bool,
    pub reset_values: bool,
    pub reuse_values: bool,
    pub reset_then_reuse_values: bool,
    pub atomic: bool,
    pub cleanup_on_fail: bool,
    pub create_namespace: bool,
    pub description: String,
    pub devel: bool,
    pub dependency_update: bool,
    pub disable_openapi_validation: bool,
    pub dry_run: bool,
    pub dry_run_option: String,
    pub wait: bool,
    pub timeout: Duration,
    pub values: String,
    pub values_files: String,
    pub cluster: ClusterOptions,
    pub tls: TlsOptions,
    pub keyring: String,
    pub debug: bool,
    pub client_only: bool,
    pub repository_config: String,
}

impl UpgradeOptions {
    pub fn normalized(mut self) -> Self {
        if self.version.is_empty() && self.devel {
            self.version = DEVEL_VERSION_CONSTRAINT.to_string();
        }
        if self.dry_run_option.is_empty() {
            self.dry_run_option = DEFAULT_DRY_RUN_OPTION.to_string();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_defaults_devel_version_and_dry_run_option() {
        let opts = InstallOptions {
            devel: true,
            ..Default::default()
        }
        .normalized();
        assert_eq!(opts.version, DEVEL_VERSION_CONSTRAINT);
        assert_eq!(opts.dry_run_option, DEFAULT_DRY_RUN_OPTION);
    }

    #[test]
    fn explicit_values_survive_normalization() {
        let opts = UpgradeOptions {
            devel: true,
            version: "1.2.3".to_string(),
            dry_run_option: "client".to_string(),
            ..Default::default()
        }
        .normalized();
        assert_eq!(opts.version, "1.2.3");
        assert_eq!(opts.dry_run_option, "client");
    }

    #[test]
    fn repo_names_split_on_commas() {
        let opts = RepoOptions {
            names: "stable, ,incubator,".to_string(),
            ..Default::default()
        };
        assert_eq!(opts.name_list(), vec!["stable", "incubator"]);
    }
}
