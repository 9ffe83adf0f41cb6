pub mod framer;
pub mod messages;

pub use framer::Framer;
pub use messages::*;
