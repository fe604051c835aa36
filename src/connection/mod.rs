pub mod connection;
mod types;

pub use connection::{Connection, StreamData};
pub use types::Role;
pub(crate) use types::{ConnectionIdDiscipline, ConnectionState, SpaceId};
