//! Host facts and process environment exposed to templates.

use serde_json::{Map, Value};
use sysinfo::System;

/// Facts about the host, keyed like the fields of `uname`.
pub fn platform_vars() -> Map<String, Value> {
    let mut vars = Map::new();
    vars.insert("system".to_string(), Value::from(system_name()));
    vars.insert(
        "node".to_string(),
        Value::from(System::host_name().unwrap_or_default()),
    );
    vars.insert(
        "release".to_string(),
        Value::from(System::kernel_version().unwrap_or_default()),
    );
    vars.insert(
        "version".to_string(),
        Value::from(System::os_version().unwrap_or_default()),
    );
    vars.insert("machine".to_string(), Value::from(std::env::consts::ARCH));
    vars.insert("processor".to_string(), Value::from(std::env::consts::ARCH));
    vars
}

/// Kernel name as `uname -s` reports it.
fn system_name() -> &'static str {
    match std::env::consts::OS {
        "linux" | "android" => "Linux",
        "macos" | "ios" => "Darwin",
        "windows" => "Windows",
        "freebsd" => "FreeBSD",
        "netbsd" => "NetBSD",
        "openbsd" => "OpenBSD",
        other => other,
    }
}

/// Variables of the current process. Non-UTF-8 entries are skipped.
pub fn process_env_vars() -> Map<String, Value> {
    std::env::vars_os()
        .filter_map(|(key, value)| {
            Some((key.into_string().ok()?, Value::from(value.into_string().ok()?)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_vars_keys() {
        let vars = platform_vars();
        for key in ["system", "node", "release", "version", "machine", "processor"] {
            assert!(vars.contains_key(key), "missing platform key {}", key);
        }
        assert_eq!(vars["machine"], std::env::consts::ARCH);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_system_name_linux() {
        assert_eq!(platform_vars()["system"], "Linux");
    }

    #[test]
    fn test_process_env_vars_contains_path() {
        let vars = process_env_vars();
        if let Ok(path) = std::env::var("PATH") {
            assert_eq!(vars["PATH"], path);
        }
    }
}
