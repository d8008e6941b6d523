//! Shared fixtures for unit tests.


pub use encoder::ReferenceEncoder;
