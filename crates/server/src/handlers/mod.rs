//! HTTP request handlers.

pub mod home;
pub mod logs;
pub mod watch;

pub use home::*;
pub use logs::*;
pub use watch::*;
