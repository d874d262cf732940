//! Credential pooling, token lifecycle, upstream transport and the request
//! orchestrator.

pub mod credential;
pub mod orchestrator;
pub mod pool;
pub mod store;
pub mod token;
pub mod upstream;

pub use credential::Credential;
pub use orchestrator::{OrchestratorConfig, ProxyOrchestrator, ProxyReply};
pub use pool::CredentialPool;
pub use store::{CredentialStore, MemoryStore};
pub use token::{TokenEndpoint, TokenGrant, TokenLifecycleManager};
pub use upstream::{HttpUpstream, Upstream, UpstreamConfig};
