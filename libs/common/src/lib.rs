pub mod id;
pub mod room;

pub use id::ConnectionId;
pub use room::Room;
