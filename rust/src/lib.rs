//! Library behind the `fluig` command: manages Fluig server profiles with
//! passwords encrypted at rest, imports and exports attribution mechanisms,
//! fast-exports forms, and renders the fast-export configuration form.

pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod forms;
pub mod mechanisms;
pub mod platform;
pub mod prompt;
pub mod servers;
pub mod view;

pub use error::FluigError;
