//! Credential model plus the single-flight refresh protocol that keeps it current.

pub mod credential;
pub mod manager;
pub mod queue;
pub mod refresher;

pub use credential::*;
pub use manager::*;
pub use queue::*;
pub use refresher::*;
