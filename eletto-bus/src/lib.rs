#![forbid(unsafe_code)]

mod bus;
mod engine;
mod error;
mod message;
mod subscription;

pub use bus::*;
pub use engine::*;
pub use error::*;
pub use message::*;
pub use subscription::*;
