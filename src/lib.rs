// Library exports for the importer binary and integration tests

pub mod cloud_storage;
pub mod config;
pub mod db;
pub mod import;
pub mod media_store;

// Test support (unit tests, or integration tests with the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
