//! Integration tests only; see the `tests/` directory.
