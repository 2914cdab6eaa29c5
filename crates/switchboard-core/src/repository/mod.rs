//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (switchboard-infra) implements. The core crate never depends on any
//! specific storage technology.
//!
//! Each trait uses native async fn in traits (RPITIT) and comes with an
//! object-safe `*Dyn` twin plus a `Box*` wrapper, so services can hold a
//! store without being generic over it.

use std::future::Future;
use std::pin::Pin;

use switchboard_types::error::RepositoryError;

pub mod api_key;
pub mod audit;
pub mod batch;
pub mod bot_state;
pub mod schedule;

pub use api_key::{ApiKeyRepository, BoxApiKeyRepository};
pub use audit::{AuditRepository, BoxAuditRepository};
pub use batch::{BatchJobRepository, BoxBatchJobRepository};
pub use bot_state::{BotStateRepository, BoxBotStateRepository};
pub use schedule::{BoxScheduleRepository, ScheduleRepository};

/// Boxed repository future used by the object-safe `*Dyn` traits.
pub type RepoFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;
