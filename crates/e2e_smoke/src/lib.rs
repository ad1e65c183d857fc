//! End-to-end smoke tests for the incident enricher live under `tests/`.
