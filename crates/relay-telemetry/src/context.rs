//! Request context propagated through every handler span.
//!
//! Carries exactly the fields spec.md §7 names as the structured
//! logging payload: `{component, worldId, credentialPrefix,
//! correlationId, kind}`. No full credential or password is ever
//! placed in a field here — callers must pass an already-redacted
//! prefix (see `relay_core::Credential::redacted_prefix`).

use tracing::Span;

/// A request-scoped logging context, attached to the span every
/// handler and component call runs inside.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    component: String,
    world_id: Option<String>,
    credential_prefix: Option<String>,
    correlation_id: Option<String>,
    kind: Option<String>,
}

impl RequestContext {
    /// Start a context for the named component (e.g. `"router"`,
    /// `"registry"`, `"pending"`).
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self { component: component.into(), ..Default::default() }
    }

    /// Attach the world id this request concerns.
    #[must_use]
    pub fn with_world_id(mut self, world_id: impl Into<String>) -> Self {
        self.world_id = Some(world_id.into());
        self
    }

    /// Attach an already-redacted credential prefix.
    #[must_use]
    pub fn with_credential_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.credential_prefix = Some(prefix.into());
        self
    }

    /// Attach the correlation id this request is tracking.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Attach the reply-kind or operation name this request concerns.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Build the `tracing` span every handler enters for the
    /// duration of this request.
    #[must_use]
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "request",
            component = %self.component,
            world_id = self.world_id.as_deref().unwrap_or(""),
            credential_prefix = self.credential_prefix.as_deref().unwrap_or(""),
            correlation_id = self.correlation_id.as_deref().unwrap_or(""),
            kind = self.kind.as_deref().unwrap_or(""),
        )
    }

    /// Enter the span and return a guard that keeps it active until
    /// dropped.
    #[must_use]
    pub fn enter(&self) -> RequestGuard {
        RequestGuard { _span: self.span().entered() }
    }
}

/// RAII guard keeping a [`RequestContext`]'s span entered.
pub struct RequestGuard {
    _span: tracing::span::EnteredSpan,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_methods_chain() {
        let ctx = RequestContext::new("router")
            .with_world_id("w1")
            .with_credential_prefix("abcd1234…")
            .with_correlation_id("search_123_abc")
            .with_kind("search");
        assert_eq!(ctx.component, "router");
        assert_eq!(ctx.world_id.as_deref(), Some("w1"));
    }

    #[test]
    fn enter_produces_a_guard_without_panicking() {
        let ctx = RequestContext::new("registry");
        let _guard = ctx.enter();
        tracing::info!("inside span");
    }
}
