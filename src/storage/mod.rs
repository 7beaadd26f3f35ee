//! Storage layer for RCS

mod item;
mod store;
mod sweeper;

pub use item::{Item, expires_at};
pub use store::Store;
pub use sweeper::ExpirySweeper;
