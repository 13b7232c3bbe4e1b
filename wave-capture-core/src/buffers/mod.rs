pub mod buffer;
pub mod completion;
pub mod pool;
