pub mod config;
pub mod deliver;
pub mod error;
pub mod feed;
pub mod history;
pub mod record;
pub mod room;
pub mod store;
pub mod timestamp;

pub use error::{Result, SkeinError};
pub use record::MessageRecord;
pub use room::{Room, RoomId};
