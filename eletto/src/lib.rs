#![forbid(unsafe_code)]

mod config;
mod elector;
mod error;

pub use config::*;
pub use elector::*;
pub use error::*;

pub use eletto_bus::{Bus, BusError, Engine, Message, MessageKind, Subscription, Token};

#[cfg(feature = "memory")]
pub use eletto_bus::{Memory, MemoryBus};
#[cfg(feature = "pg")]
pub use eletto_bus::{Pg, PgBus};
