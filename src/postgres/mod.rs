pub mod buf;
pub mod connection;
pub mod copy;
pub mod decoder;
pub mod fields;
pub mod schema;
pub mod types;


#[cfg(test)]
mod decoder_tests;

pub use connection::{MessageStream, ReplicationConnection, Slot};
pub use types::{LogicalMessage, Lsn, SystemInfo};
