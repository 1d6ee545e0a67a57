use crate::config::Scope;

/// Maps request paths to the rate limiting scope they are counted under
///
/// The longest matching prefix wins; a prefix matches the path itself and
/// anything below it (`/api/v1/users` matches `/api/v1/users/login` but not
/// `/api/v1/usersettings`).
#[derive(Debug, Clone)]
pub struct ScopeRoutes {
    routes: Vec<(String, Scope)>,
    fallback: Scope,
}

impl ScopeRoutes {
    pub fn new(fallback: Scope) -> Self {
        Self {
            routes: Vec::new(),
            fallback,
        }
    }

    /// Count requests under `prefix` against `scope`
    pub fn route(mut self, prefix: impl Into<String>, scope: Scope) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_end_matches('/').to_string();
        self.routes.push((prefix, scope));
        // Longest prefix first.
        self.routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    pub fn scope_for(&self, path: &str) -> Scope {
        self.routes
            .iter()
            .find(|(prefix, _)| matches_prefix(path, prefix))
            .map(|(_, scope)| *scope)
            .unwrap_or(self.fallback)
    }
}

impl Default for ScopeRoutes {
    fn default() -> Self {
        Self::new(Scope::Api)
            .route("/api/v1/users", Scope::Auth)
            .route("/api/v1/search", Scope::Search)
    }
}

fn matches_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_routes() {
        let routes = ScopeRoutes::default();
        assert_eq!(routes.scope_for("/api/v1/users/login"), Scope::Auth);
        assert_eq!(routes.scope_for("/api/v1/users"), Scope::Auth);
        assert_eq!(routes.scope_for("/api/v1/search/projects"), Scope::Search);
        assert_eq!(routes.scope_for("/api/v1/projects/getAllProjects"), Scope::Api);
        assert_eq!(routes.scope_for("/"), Scope::Api);
    }

    #[test]
    fn prefix_respects_segment_boundaries() {
        let routes = ScopeRoutes::default();
        assert_eq!(routes.scope_for("/api/v1/usersettings"), Scope::Api);
    }

    #[test]
    fn longest_prefix_wins() {
        let routes = ScopeRoutes::new(Scope::Api)
            .route("/api/", Scope::Search)
            .route("/api/v1/users", Scope::Auth);
        assert_eq!(routes.scope_for("/api/v1/users/logout"), Scope::Auth);
        assert_eq!(routes.scope_for("/api/v1/projects"), Scope::Search);
        assert_eq!(routes.scope_for("/metrics"), Scope::Api);
    }
}
