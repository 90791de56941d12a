//! Request handlers.

pub mod billing;
pub mod credits;
pub mod health;
pub mod operations;
pub mod session;

pub use billing::*;
pub use credits::*;
pub use health::*;
pub use operations::*;
pub use session::*;
