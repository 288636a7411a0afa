pub mod credential;
pub mod providers;

pub use credential::{CredentialProvider, MissingCredential, StaticCredential};
pub use providers::create_engine;
pub use providers::responses::HttpResponseEngine;
