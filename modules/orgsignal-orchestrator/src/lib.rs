pub mod cache;
pub mod fanout;
pub mod formatter;
pub mod opportunities;
pub mod persistence;
pub mod pipeline;
pub mod synthesis;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod util;
