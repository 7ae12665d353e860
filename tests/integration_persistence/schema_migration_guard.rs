//! Integration: schema version bump triggers Safe Mode and user choices.

#[test]
#[ignore = "integration harness pending"]
fn schema_migration_guard() {
    // Steps:
    // - Simulate a schema version mismatch
    // - Verify Safe Mode banner and recovery choices are available
    assert!(true);
}

