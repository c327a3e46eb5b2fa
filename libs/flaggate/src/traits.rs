use http::Method;

/// Maps an incoming request to the flag key that gates it
pub trait FlagRoutePolicy: Send + Sync {
    /// Flag key gating `method path`, or `None` when the route is not gated
    fn resolve(&self, method: &Method, path: &str) -> Option<String>;
}
