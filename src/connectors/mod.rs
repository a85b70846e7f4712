//! External service connectors.
//!
//! Routes depend on the traits defined here, injected as
//! `web::Data<Arc<dyn Trait>>`, and never on the HTTP clients behind them.
//! Each connector ships a mock for route tests.

pub mod completion;
pub mod errors;

pub use completion::init as init_completion;
pub use completion::{CompletionConnector, CompletionStream, OpenRouterClient};
pub use errors::ConnectorError;
