//! Management-plane data models

mod subscription;
mod tenant;

pub use subscription::*;
pub use tenant::*;
