pub mod callback;
pub mod error;
pub mod oauth;
pub mod router;

pub use callback::{authorize_interactively, CallbackError};
pub use error::AuthError;
pub use oauth::OAuthFlow;
