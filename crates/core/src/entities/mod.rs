mod file_meta;
mod message;

pub use file_meta::FileMeta;
pub use message::WireMessage;
