//! Use cases - user story orchestration across infrastructure.

pub mod dispatch;

pub use dispatch::{ActionDispatcher, DispatchConfig, DispatchError};
