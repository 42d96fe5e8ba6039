//! Integration tests for the BackHub master.
//!
//! These tests drive the real router against a PostgreSQL database.
//! Set `BACKHUB_TEST_DATABASE_URL` to run them; without it each test
//! exits early so the suite stays green on machines without a database.

mod helpers;

mod enrollment_test;
mod progress_test;
mod quota_test;
mod retention_test;
