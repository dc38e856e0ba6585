//! Verify that `build.rs` sets `THREADBOX_VERSION` correctly.
//!
//! The version embedded at compile time must never start with `v` (the CLI
//! prints it after its own prefix) and must look like a semver string.
//! Dev builds (no `THREADBOX_RELEASE_VERSION` env var) use the Cargo.toml
//! version (`0.0.0-dev`).

const VERSION: &str = env!("THREADBOX_VERSION");

#[test]
fn version_has_no_v_prefix() {
    assert!(
        !VERSION.starts_with('v'),
        "THREADBOX_VERSION must not start with 'v' (got {VERSION:?})"
    );
}

#[test]
fn version_starts_with_digit() {
    assert!(
        VERSION.starts_with(|c: char| c.is_ascii_digit()),
        "THREADBOX_VERSION must start with a digit (got {VERSION:?})"
    );
}

#[test]
fn dev_build_version_matches_cargo_toml() {
    if VERSION.contains("-dev") {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
