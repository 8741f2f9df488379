//! Data models

mod access_key;
mod health;
mod job;
mod notification;
mod server;
pub mod settings;
mod usage;

pub use access_key::*;
pub use health::*;
pub use job::*;
pub use notification::*;
pub use server::*;
pub use settings::*;
pub use usage::*;
