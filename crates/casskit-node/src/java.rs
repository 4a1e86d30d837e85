//! Java runtime detection

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"version "([^"]+)""#).expect("valid version regex"));

/// Upper bound for `java -version`
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Feature release of the runtime in `java_home` (or on `PATH`)
///
/// Returns `None` when the runtime cannot be run or its output is not
/// recognized; callers treat an unknown runtime as needing no workarounds.
pub async fn detect_major_version(java_home: Option<&Path>) -> Option<u32> {
    let java = match java_home {
        Some(home) => home.join("bin").join(if cfg!(windows) { "java.exe" } else { "java" }),
        None => "java".into(),
    };

    let output = Command::new(&java)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(VERSION_CHECK_TIMEOUT, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!(java = %java.display(), error = %e, "Java runtime not available");
            return None;
        }
        Err(_) => {
            warn!(java = %java.display(), "Java version check timed out");
            return None;
        }
    };

    // `java -version` writes to stderr; some wrappers use stdout.
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stderr),
        String::from_utf8_lossy(&output.stdout)
    );
    let major = parse_major_version(&text);
    debug!(java = %java.display(), major = ?major, "Detected Java runtime");
    major
}

/// Feature release from `java -version` output
///
/// `1.8.0_292` is 8, `11.0.2` is 11, `17` is 17.
pub fn parse_major_version(output: &str) -> Option<u32> {
    let version = VERSION_PATTERN.captures(output)?.get(1)?.as_str();
    let mut parts = version.split(|c: char| c == '.' || c == '_' || c == '-' || c == '+');
    let first: u32 = parts.next()?.parse().ok()?;
    if first == 1 {
        parts.next()?.parse().ok()
    } else {
        Some(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_major_version() {
        assert_eq!(
            parse_major_version("java version \"1.8.0_292\"\nJava(TM) SE Runtime Environment"),
            Some(8)
        );
        assert_eq!(parse_major_version("openjdk version \"11.0.2\" 2019-01-15"), Some(11));
        assert_eq!(parse_major_version("openjdk version \"17\" 2021-09-14"), Some(17));
        assert_eq!(parse_major_version("openjdk version \"21-ea\" 2023-09-19"), Some(21));
        assert_eq!(parse_major_version("command not found"), None);
    }

    #[tokio::test]
    async fn test_missing_runtime_is_unknown() {
        let home = tempfile::TempDir::new().unwrap();
        assert_eq!(detect_major_version(Some(home.path())).await, None);
    }
}
