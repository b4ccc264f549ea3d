pub mod dispatcher;
pub mod idempotency;
pub mod publisher;
pub mod status;
pub mod validator;

pub use dispatcher::{DispatchReceipt, Dispatcher};
pub use idempotency::IdempotencyGuard;
pub use publisher::QueuePublisher;
pub use status::StatusStore;
pub use validator::DependencyValidator;
