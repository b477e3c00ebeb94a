//! On-disk record stream and recorder command messages

pub mod command;
pub mod record;
