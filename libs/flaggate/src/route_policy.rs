use crate::traits::FlagRoutePolicy;
use http::Method;
use std::collections::HashMap;

/// Route policy over exact `(method, path)` pairs
#[derive(Debug, Clone, Default)]
pub struct StaticRoutePolicy {
    routes: HashMap<(Method, String), String>,
}

impl StaticRoutePolicy {
    /// Gate `method path` behind `flag`; a later entry for the same route wins
    #[must_use]
    pub fn with_route(mut self, method: Method, path: &str, flag: &str) -> Self {
        self.routes
            .insert((method, path.to_owned()), flag.to_owned());
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl FlagRoutePolicy for StaticRoutePolicy {
    fn resolve(&self, method: &Method, path: &str) -> Option<String> {
        self.routes
            .get(&(method.clone(), path.to_owned()))
            .cloned()
    }
}
