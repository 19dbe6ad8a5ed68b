//! One function per bridge operation. Each normalizes its options, calls the
//! registered backend through [`run_action`] and returns the aggregated text.
//! Callers run these inside [`crate::invoke`].

use crate::aggregate::Aggregation;
use crate::backend::{self, run_action, LintReport};
use crate::config::BridgeConfig;
use crate::options::*;

pub fn create(options: CreateOptions) -> Aggregation {
    run_action(false, |pm, _| pm.create(&options).map(|_| String::new()))
}

pub fn dependency_build(options: DependencyOptions) -> Aggregation {
    run_action(options.debug, |pm, logs| pm.dependency_build(&options, logs))
}

pub fn dependency_list(options: DependencyOptions) -> Aggregation {
    run_action(options.debug, |pm, logs| pm.dependency_list(&options, logs))
}

pub fn dependency_update(options: DependencyOptions) -> Aggregation {
    run_action(options.debug, |pm, logs| pm.dependency_update(&options, logs))
}

pub fn get_values(options: GetValuesOptions) -> Aggregation {
    run_action(false, |pm, logs| pm.get_values(&options, logs))
}

pub fn history(options: HistoryOptions) -> Aggregation {
    run_action(false, |pm, logs| pm.history(&options, logs))
}

pub fn install(options: InstallOptions) -> Aggregation {
    let options = options.normalized();
    run_action(options.debug, |pm, logs| pm.install(&options, logs))
}

/// Lint findings are output, never an error.
pub fn lint(options: LintOptions) -> Aggregation {
    let report = match backend::current().lint(&options) {
        Ok(report) => report,
        Err(err) => LintReport {
            messages: vec![format!("{err:#}")],
            failed: true,
        },
    };
    Aggregation::success(report.render())
}

pub fn list(options: ListOptions) -> Aggregation {
    run_action(false, |pm, logs| pm.list(&options, logs))
}

pub fn package(options: PackageOptions) -> Aggregation {
    run_action(false, |pm, _| pm.package(&options).map(|_| String::new()))
}

pub fn push(options: PushOptions) -> Aggregation {
    run_action(options.debug, |pm, logs| pm.push(&options, logs))
}

pub fn registry_login(options: RegistryOptions) -> Aggregation {
    run_action(options.debug, |pm, logs| pm.registry_login(&options, logs))
}

pub fn registry_logout(options: RegistryOptions) -> Aggregation {
    run_action(options.debug, |pm, logs| pm.registry_logout(&options, logs))
}

pub fn repo_add(options: RepoOptions) -> Aggregation {
    run_action(false, |pm, _| pm.repo_add(&options).map(|()| String::new()))
}

pub fn repo_list(options: RepoOptions) -> Aggregation {
    run_action(false, |pm, _| pm.repo_list(&options))
}

pub fn repo_remove(options: RepoOptions) -> Aggregation {
    run_action(false, |pm, _| pm.repo_remove(&options).map(|()| String::new()))
}

pub fn repo_update(options: RepoOptions) -> Aggregation {
    run_action(false, |pm, _| pm.repo_update(&options).map(|()| String::new()))
}

pub fn search_repo(options: SearchOptions) -> Aggregation {
    run_action(false, |pm, _| pm.search_repo(&options))
}

pub fn show(options: ShowOptions) -> Aggregation {
    run_action(options.debug, |pm, logs| pm.show(&options, logs))
}

pub fn status(options: StatusOptions) -> Aggregation {
    run_action(false, |pm, logs| pm.status(&options, logs))
}

pub fn template(options: TemplateOptions) -> Aggregation {
    run_action(options.debug, |pm, logs| pm.template(&options, logs))
}

/// A zero timeout takes the configured default.
pub fn test(mut options: TestOptions) -> Aggregation {
    if options.timeout.is_zero() {
        options.timeout = BridgeConfig::from_env().default_test_timeout;
    }
    run_action(options.debug, |pm, logs| pm.test(&options, logs))
}

pub fn uninstall(options: UninstallOptions) -> Aggregation {
    run_action(options.debug, |pm, logs| pm.uninstall(&options, logs))
}

pub fn upgrade(options: UpgradeOptions) -> Aggregation {
    let options = options.normalized();
    run_action(options.debug, |pm, logs| pm.upgrade(&options, logs))
}

pub fn version() -> Aggregation {
    run_action(false, |pm, _| pm.version())
}
