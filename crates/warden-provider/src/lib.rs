pub mod retry;
pub mod session;
pub mod testing;

pub use retry::{RetryPolicy, with_retry};
pub use session::{Page, ProviderSession, SessionError, list_all};
pub use testing::StaticSession;
