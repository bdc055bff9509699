//! Integration Test: No Printing From the Core Library
//!
//! **Policy**: `statusboard-core` reports through `tracing` only. Writing to
//! stdout/stderr is reserved for the daemon binary's CLI subcommands.

use architectural_enforcement::scan_directory;

fn is_print_call(code: &str) -> bool {
    ["println!(", "eprintln!(", "print!(", "eprint!(", "dbg!("]
        .iter()
        .any(|mac| code.contains(mac))
}

#[test]
fn test_no_print_in_core() {
    let violations = scan_directory("statusboard/core/src", is_print_call);

    if !violations.is_empty() {
        eprintln!("\n❌ Direct printing found in statusboard-core!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use tracing::{{debug, info, warn, error}} with structured fields");

        panic!("\nFound {} print violation(s) in core.", violations.len());
    }
}
