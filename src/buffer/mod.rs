mod frame;
mod pool;
mod replacer;

pub use frame::FrameHeader;
pub use pool::BufferPool;
pub use replacer::{LruReplacer, Replacer};
