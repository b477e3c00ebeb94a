pub mod control;
pub mod list;
pub mod read;
pub mod record;
