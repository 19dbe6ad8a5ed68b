use std::panic::{self, AssertUnwindSafe};

use libc::c_char;
use pkgbridge_core::{invoke, logging, ops, Aggregation};
use pkgbridge_repotest::ServerRegistry;
use tracing::{debug, warn};

use crate::ffi::*;

const INTERNAL_FAILURE: &str = "pkgbridge: internal failure";

fn guarded(body: impl FnOnce() -> bridge_result) -> bridge_result {
    logging::init();
    panic::catch_unwind(AssertUnwindSafe(body))
        .unwrap_or_else(|_| bridge_result::error(INTERNAL_FAILURE))
}

fn call<T>(op: &str, options: *const T, run: impl FnOnce(&T) -> Aggregation) -> bridge_result {
    guarded(|| {
        let Some(options) = (unsafe { options.as_ref() }) else {
            warn!(op, "called with null options");
            return bridge_result::error(&format!("{op}: options must not be null"));
        };
        debug!(op, "bridge call");
        bridge_result::from_outcome(invoke(|| run(options)))
    })
}

#[no_mangle]
pub extern "C" fn pkgbridge_create(options: *const create_options) -> bridge_result {
    call("create", options, |o| ops::create(unsafe { o.to_options() }))
}

#[no_mangle]
pub extern "C" fn pkgbridge_dependency_build(options: *const dependency_options) -> bridge_result {
    call("dependency_build", options, |o| {
        ops::dependency_build(unsafe { o.to_options() })
    })
}

#[no_mangle]
pub extern "C" fn pkgbridge_dependency_list(options: *const dependency_options) -> bridge_result {
    call("dependency_list", options, |o| {
        ops::dependency_list(unsafe { o.to_options() })
    })
}

#[no_mangle]
pub extern "C" fn pkgbridge_dependency_update(options: *const dependency_options) -> bridge_result {
    call("dependency_update", options, |o| {
        ops::dependency_update(unsafe { o.to_options() })
    })
}

#[no_mangle]
pub extern "C" fn pkgbridge_get_values(options: *const get_values_options) -> bridge_result {
    call("get_values", options, |o| {
        ops::get_values(unsafe { o.to_options() })
    })
}

#[no_mangle]
pub extern "C" fn pkgbridge_history(options: *const history_options) -> bridge_result {
    call("history", options, |o| ops::history(unsafe { o.to_options() }))
}

#[no_mangle]
pub extern "C" fn pkgbridge_install(options: *const install_options) -> bridge_result {
    call("install", options, |o| ops::install(unsafe { o.to_options() }))
}

#[no_mangle]
pub extern "C" fn pkgbridge_lint(options: *const lint_options) -> bridge_result {
    call("lint", options, |o| ops::lint(unsafe { o.to_options() }))
}

#[no_mangle]
pub extern "C" fn pkgbridge_list(options: *const list_options) -> bridge_result {
    call("list", options, |o| ops::list(unsafe { o.to_options() }))
}

#[no_mangle]
pub extern "C" fn pkgbridge_package(options: *const package_options) -> bridge_result {
    call("package", options, |o| ops::package(unsafe { o.to_options() }))
}

#[no_mangle]
pub extern "C" fn pkgbridge_push(options: *const push_options) -> bridge_result {
    call("push", options, |o| ops::push(unsafe { o.to_options() }))
}

#[no_mangle]
pub extern "C" fn pkgbridge_registry_login(options: *const registry_options) -> bridge_result {
    call("registry_login", options, |o| {
        ops::registry_login(unsafe { o.to_options() })
    })
}

#[no_mangle]
pub extern "C" fn pkgbridge_registry_logout(options: *const registry_options) -> bridge_result {
    call("registry_logout", options, |o| {
        ops::registry_logout(unsafe { o.to_options() })
    })
}

#[no_mangle]
pub extern "C" fn pkgbridge_repo_add(options: *const repo_options) -> bridge_result {
    call("repo_add", options, |o| ops::repo_add(unsafe { o.to_options() }))
}

#[no_mangle]
pub extern "C" fn pkgbridge_repo_list(options: *const repo_options) -> bridge_result {
    call("repo_list", options, |o| ops::repo_list(unsafe { o.to_options() }))
}

#[no_mangle]
pub extern "C" fn pkgbridge_repo_remove(options: *const repo_options) -> bridge_result {
    call("repo_remove", options, |o| {
        ops::repo_remove(unsafe { o.to_options() })
    })
}

#[no_mangle]
pub extern "C" fn pkgbridge_repo_update(options: *const repo_options) -> bridge_result {
    call("repo_update", options, |o| {
        ops::repo_update(unsafe { o.to_options() })
    })
}

#[no_mangle]
pub extern "C" fn pkgbridge_search_repo(options: *const search_options) -> bridge_result {
    call("search_repo", options, |o| {
        ops::search_repo(unsafe { o.to_options() })
    })
}

#[no_mangle]
pub extern "C" fn pkgbridge_show(options: *const show_options) -> bridge_result {
    call("show", options, |o| ops::show(unsafe { o.to_options() }))
}

#[no_mangle]
pub extern "C" fn pkgbridge_status(options: *const status_options) -> bridge_result {
    call("status", options, |o| ops::status(unsafe { o.to_options() }))
}

#[no_mangle]
pub extern "C" fn pkgbridge_template(options: *const template_options) -> bridge_result {
    call("template", options, |o| ops::template(unsafe { o.to_options() }))
}

#[no_mangle]
pub extern "C" fn pkgbridge_test(options: *const test_options) -> bridge_result {
    call("test", options, |o| ops::test(unsafe { o.to_options() }))
}

#[no_mangle]
pub extern "C" fn pkgbridge_uninstall(options: *const uninstall_options) -> bridge_result {
    call("uninstall", options, |o| ops::uninstall(unsafe { o.to_options() }))
}

#[no_mangle]
pub extern "C" fn pkgbridge_upgrade(options: *const upgrade_options) -> bridge_result {
    call("upgrade", options, |o| ops::upgrade(unsafe { o.to_options() }))
}

#[no_mangle]
pub extern "C" fn pkgbridge_version() -> bridge_result {
    guarded(|| bridge_result::from_outcome(invoke(ops::version)))
}

/// Starts a chart index server; `out` is its base URL.
#[no_mangle]
pub extern "C" fn pkgbridge_repo_server_start(options: *const repo_server_options) -> bridge_result {
    call("repo_server_start", options, |o| {
        let options = unsafe { o.to_options() };
        Aggregation::from_result(ServerRegistry::global().start_http(&options))
    })
}

/// Starts an OCI registry; `out` is its `localhost:<port>` address.
#[no_mangle]
pub extern "C" fn pkgbridge_repo_oci_server_start(
    options: *const repo_server_options,
) -> bridge_result {
    call("repo_oci_server_start", options, |o| {
        let options = unsafe { o.to_options() };
        Aggregation::from_result(ServerRegistry::global().start_oci(&options))
    })
}

/// Unknown ids are ignored. Teardown failures come back in `err`.
#[no_mangle]
pub extern "C" fn pkgbridge_repo_server_stop(id: *const c_char) -> bridge_result {
    guarded(|| {
        let id = unsafe { read_str(id) };
        match ServerRegistry::global().stop(&id) {
            Ok(stopped) => {
                debug!(%id, stopped, "repo server stop");
                bridge_result::empty()
            }
            Err(err) => teardown_failure(err),
        }
    })
}

#[no_mangle]
pub extern "C" fn pkgbridge_repo_server_stop_all() -> bridge_result {
    guarded(|| match ServerRegistry::global().stop_all() {
        Ok(stopped) => {
            debug!(stopped, "repo servers stopped");
            bridge_result::empty()
        }
        Err(err) => teardown_failure(err),
    })
}

fn teardown_failure(err: anyhow::Error) -> bridge_result {
    let message = format!("{err:#}");
    warn!(error = %message, "repo server teardown failed");
    bridge_result::error(&message)
}

/// Releases every string in `result`. The record must come from this library
/// and must not be freed twice.
#[no_mangle]
pub unsafe extern "C" fn pkgbridge_free(result: bridge_result) {
    let _ = panic::catch_unwind(AssertUnwindSafe(|| result.release()));
}
