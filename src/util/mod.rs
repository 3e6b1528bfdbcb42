//! Internal utilities shared by the library and the `depot` binary.

pub mod lock;
pub mod output;
pub mod progress;
