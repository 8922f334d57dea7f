mod models;
mod timestamp;

pub use models::{Bar, FetchParameter, RawBar, DEFAULT_LIMIT, DEFAULT_UNIT};
pub use timestamp::UtcDateTime;
