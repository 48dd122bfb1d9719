//! Core types for baton.

pub mod items;
pub mod message;
pub mod settings;
pub mod stream;
pub mod usage;

pub use items::*;
pub use message::*;
pub use settings::*;
pub use stream::*;
pub use usage::*;
