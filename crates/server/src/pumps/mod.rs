//! Per-connection tasks: read (dispatch), write and ping.

mod ping;
mod read;
mod write;

pub(crate) use ping::ping_pump;
pub(crate) use read::{ReadLimits, read_pump};
pub(crate) use write::write_pump;
