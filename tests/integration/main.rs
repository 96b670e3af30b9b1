//! End-to-end tests against wiremock servers

mod ingest_tests;
