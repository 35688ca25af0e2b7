//! Strategy registry: one [`Resolver`] facade over interchangeable strategies.
//!
//! The [`ResolverRegistry`] picks the highest-priority strategy whose
//! `can_handle` accepts the link. Within the same priority level, strategies
//! are tried in registration order.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::fetch::{Fetcher, safe_file_name};
use crate::link::Link;

use super::{
    ApiResolver, ApiSettings, FileInfo, PageResolver, ResolveError, Resolver, ResolverPriority,
};

/// Builds the default registry: the API strategy for the provider host, the
/// page strategy for everything else.
#[must_use]
pub fn build_default_registry(fetcher: Arc<dyn Fetcher>, api: ApiSettings) -> ResolverRegistry {
    let mut registry = ResolverRegistry::new();
    registry.register(Box::new(ApiResolver::new(Arc::clone(&fetcher), api)));
    registry.register(Box::new(PageResolver::new(fetcher)));
    registry
}

/// A priority-ordered collection of resolution strategies.
pub struct ResolverRegistry {
    resolvers: Vec<Box<dyn Resolver>>,
}

impl ResolverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            resolvers: Vec::new(),
        }
    }

    /// Registers a strategy.
    #[tracing::instrument(skip(self, resolver), fields(resolver_name))]
    pub fn register(&mut self, resolver: Box<dyn Resolver>) {
        tracing::Span::current().record("resolver_name", resolver.name());
        debug!(
            name = resolver.name(),
            priority = ?resolver.priority(),
            "Registering resolver"
        );
        self.resolvers.push(resolver);
    }

    /// Returns the number of registered strategies.
    #[must_use]
    pub fn resolver_count(&self) -> usize {
        self.resolvers.len()
    }

    /// Returns true if no strategies are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Returns the strategy that will resolve `link`, if any.
    #[must_use]
    pub fn find_handler(&self, link: &Link) -> Option<&dyn Resolver> {
        self.resolvers
            .iter()
            .filter(|r| r.can_handle(link))
            .min_by_key(|r| r.priority())
            .map(AsRef::as_ref)
    }
}

#[async_trait]
impl Resolver for ResolverRegistry {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn priority(&self) -> ResolverPriority {
        ResolverPriority::Fallback
    }

    fn can_handle(&self, link: &Link) -> bool {
        self.find_handler(link).is_some()
    }

    async fn resolve(&self, link: &Link) -> Result<FileInfo, ResolveError> {
        let Some(handler) = self.find_handler(link) else {
            warn!(link = %link, "no resolver handles this link");
            return Ok(FileInfo::unresolvable(link.clone(), "no resolver handles this link"));
        };
        debug!(resolver = handler.name(), link = %link, "dispatching link");
        let info = handler.resolve(link).await?;
        Ok(with_safe_filename(info))
    }
}

/// Reduces a resolved filename to one safe path component. A name with
/// nothing usable left makes the link unresolvable.
fn with_safe_filename(mut info: FileInfo) -> FileInfo {
    if info.resolution_failed {
        return info;
    }
    match safe_file_name(&info.filename) {
        Some(name) => {
            info.filename = name;
            info
        }
        None => {
            warn!(link = %info.link, filename = %info.filename, "resolved filename is unusable");
            let reason = format!("unusable filename '{}'", info.filename);
            FileInfo::unresolvable(info.link, reason)
        }
    }
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.resolvers.iter().map(|r| r.name()).collect();
        f.debug_struct("ResolverRegistry")
            .field("resolver_count", &self.resolvers.len())
            .field("resolvers", &names)
            .finish()
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
