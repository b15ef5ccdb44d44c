mod pager;

pub use pager::Pager;
