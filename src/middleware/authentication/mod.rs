mod getheader;
mod manager;
mod manager_middleware;
mod method;

pub use getheader::*;
pub use manager::*;
pub use manager_middleware::*;
pub use method::TokenCache;

/// Reachable without a bearer token.
const PUBLIC_PATHS: &[&str] = &["/health_check"];

pub fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
}
