pub mod slice;
pub mod stack;
