//! Shared fixtures for ledger and VM tests.
