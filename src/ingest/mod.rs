pub mod normalize;
pub mod reader;
pub mod timestamp;
