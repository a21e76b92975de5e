//! Typed room names.
//!
//! A room is a broadcast scope with no identity beyond its name. The wire form
//! is `<kind>:<id>`, e.g. `user:usr_1`, `group:g1`, `session:s9`.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Room {
    /// Personal room of a user; every connection of that user joins it.
    User(String),
    /// Members of a group who verified membership at join time.
    Group(String),
    /// Participants of one feedback session.
    Session(String),
}

impl Room {
    pub fn user(id: impl Into<String>) -> Self {
        Room::User(id.into())
    }

    pub fn group(id: impl Into<String>) -> Self {
        Room::Group(id.into())
    }

    pub fn session(id: impl Into<String>) -> Self {
        Room::Session(id.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Room::User(_) => "user",
            Room::Group(_) => "group",
            Room::Session(_) => "session",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Room::User(id) | Room::Group(id) | Room::Session(id) => id,
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRoomError(String);

impl fmt::Display for ParseRoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid room name: {}", self.0)
    }
}

impl std::error::Error for ParseRoomError {}

impl FromStr for Room {
    type Err = ParseRoomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s.split_once(':').ok_or_else(|| ParseRoomError(s.to_string()))?;
        if id.is_empty() {
            return Err(ParseRoomError(s.to_string()));
        }
        match kind {
            "user" => Ok(Room::user(id)),
            "group" => Ok(Room::group(id)),
            "session" => Ok(Room::session(id)),
            _ => Err(ParseRoomError(s.to_string())),
        }
    }
}
