pub mod messages;
pub mod protocol;
