//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call sleep methods. Periodic work
//! uses `tokio::time::interval`, waits use channels or timeouts.
//! **Exceptions**: test code

use architectural_enforcement::scan_directory;

fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(")
}

#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = scan_directory("statusboard/core/src", is_sleep_call);
    violations.extend(scan_directory("statusboard/daemon/src", is_sleep_call));

    if !violations.is_empty() {
        eprintln!("\n❌ Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use tokio::time::interval, channels or tokio::time::timeout instead");

        panic!("\nFound {} sleep violation(s) in production code.", violations.len());
    }
}

#[test]
fn test_sleep_detection() {
    assert!(is_sleep_call("tokio::time::sleep(Duration::from_secs(1)).await;"));
    assert!(is_sleep_call("std::thread::sleep(d);"));
    assert!(!is_sleep_call("let sleepy = true;"));
}
