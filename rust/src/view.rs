//! Fast export configuration form: renders the HTML page and applies the
//! `save` message the page produces.

use askama::Template;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::servers;

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("template rendering failed: {0}")]
    Render(String),
    #[error("invalid form message: {0}")]
    InvalidMessage(String),
    #[error("persistence type {0:?} is not a number")]
    InvalidPersistenceType(String),
}

struct ServerOption<'a> {
    id: &'a str,
    name: &'a str,
    selected: bool,
}

#[derive(Template)]
#[template(path = "fast_export_config.html")]
struct FastExportConfigPage<'a> {
    servers: Vec<ServerOption<'a>>,
    parent_id: &'a str,
    dataset_name: &'a str,
    description_field: &'a str,
    persistence_type: u8,
}

/// Renders the configuration form prefilled from `settings`.
pub fn render_fast_export_config(settings: &Settings) -> Result<String, ViewError> {
    let fast_export = &settings.fast_export;
    let selected_id = fast_export.default_server_id.as_deref().unwrap_or_default();
    let page = FastExportConfigPage {
        servers: settings
            .configurations
            .iter()
            .map(|server| ServerOption {
                id: &server.id,
                name: &server.name,
                selected: server.id == selected_id,
            })
            .collect(),
        parent_id: fast_export.default_parent_id.as_deref().unwrap_or_default(),
        dataset_name: fast_export.default_dataset_name.as_deref().unwrap_or_default(),
        description_field: fast_export.default_description_field.as_deref().unwrap_or_default(),
        // Anything but an explicit single-table choice shows as multiple tables.
        persistence_type: if fast_export.default_persistence_type == Some(0) { 0 } else { 1 },
    };
    page.render().map_err(|e| ViewError::Render(format!("{e}")))
}

/// Message posted by the configuration form.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewMessage {
    pub command: String,
    #[serde(default)]
    pub server_id: String,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub dataset_name: String,
    /// The form sends the select's value as a string; numbers are accepted too.
    #[serde(default)]
    pub persistence_type: Option<Value>,
    #[serde(default)]
    pub description_field: String,
}

impl ViewMessage {
    pub fn from_json(raw: &str) -> Result<Self, ViewError> {
        serde_json::from_str(raw).map_err(|e| ViewError::InvalidMessage(format!("{e}")))
    }
}

fn parse_persistence_type(value: Option<&Value>) -> Result<u8, ViewError> {
    let invalid = |value: &Value| ViewError::InvalidPersistenceType(value.to_string());
    match value {
        Some(Value::String(raw)) => raw
            .trim()
            .parse()
            .map_err(|_| ViewError::InvalidPersistenceType(raw.clone())),
        Some(number @ Value::Number(_)) => number
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .ok_or_else(|| invalid(number)),
        Some(other) => Err(invalid(other)),
        None => Err(ViewError::InvalidPersistenceType(String::new())),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Applies a form message to the settings. Returns `true` when settings changed.
pub fn handle_message(settings: &mut Settings, message: &ViewMessage) -> Result<bool, ViewError> {
    if message.command != "save" {
        debug!(command = %message.command, "ignoring form message");
        return Ok(false);
    }
    let persistence_type = parse_persistence_type(message.persistence_type.as_ref())?;
    if !message.server_id.is_empty() && servers::find_by_id(settings, &message.server_id).is_none() {
        warn!(server = %message.server_id, "fast export default points at an unknown server");
    }

    let fast_export = &mut settings.fast_export;
    fast_export.default_server_id = non_empty(&message.server_id);
    fast_export.default_parent_id = non_empty(&message.parent_id);
    fast_export.default_dataset_name = non_empty(&message.dataset_name);
    fast_export.default_persistence_type = Some(persistence_type);
    fast_export.default_description_field = non_empty(&message.description_field);
    info!("fast export settings updated");
    Ok(true)
}
