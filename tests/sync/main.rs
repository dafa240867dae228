// Test module entry point for sync tests
// All replication-related integration tests organized here


mod coordinator_tests;
#[cfg(unix)]
mod ssh_tests;
