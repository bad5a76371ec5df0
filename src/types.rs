use std::sync::Arc;

use crate::provider::{DnsProvider, ProjectId};

/// Process-wide configuration and collaborators, resolved once at startup and
/// handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub dns_provider: Arc<dyn DnsProvider + Send + Sync>,
    pub project_id: ProjectId,
    pub shared_key: String,
}
