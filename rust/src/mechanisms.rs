//! Custom attribution mechanisms: REST client plus the import/export flows.
//!
//! A mechanism's script lives in the workspace as `mechanisms/<id>.js`. Import
//! writes that file from the server; export pushes the file back, creating the
//! mechanism when it does not exist yet.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::context::AppContext;
use crate::platform::{http_client, PlatformError};
use crate::prompt::{Notice, PickItem, Prompter};
use crate::servers::{self, ServerConnection, ServerError};

const BASE_PATH: &str = "/ecm/api/rest/ecm/mechanism/";
const NEW_MECHANISM_LABEL: &str = "New custom mechanism";
const CUSTOM_CONTROL_CLASS: &str =
    "com.datasul.technology.webdesk.workflow.assignment.customization.CustomAssignmentImpl";
pub const MECHANISMS_DIR: &str = "mechanisms";

#[derive(Debug, Error)]
pub enum MechanismError {
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("mechanism file error: {0}")]
    Io(String),
    /// The id cannot be used as a file name inside `mechanisms/`.
    #[error("mechanism id {0:?} is not a valid file name")]
    InvalidId(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionMechanismPk {
    pub company_id: u64,
    pub attribution_mecanism_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionMechanism {
    #[serde(rename = "attributionMecanismPK")]
    pub pk: AttributionMechanismPk,
    #[serde(default)]
    pub assignment_type: i64,
    #[serde(default)]
    pub control_class: String,
    #[serde(default)]
    pub pre_selection_class: Option<String>,
    #[serde(default)]
    pub configuration_class: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// The mechanism's script source.
    #[serde(default)]
    pub attribution_mecanism_description: String,
    /// Fields the server sends that are passed back untouched on update.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl AttributionMechanism {
    /// Skeleton for a mechanism that does not exist on the server yet.
    pub fn new_custom(company_id: u64, id: &str) -> Self {
        Self {
            pk: AttributionMechanismPk {
                company_id,
                attribution_mecanism_id: id.to_string(),
            },
            assignment_type: 1,
            control_class: CUSTOM_CONTROL_CLASS.to_string(),
            pre_selection_class: None,
            configuration_class: String::new(),
            name: String::new(),
            description: String::new(),
            attribution_mecanism_description: String::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.pk.attribution_mecanism_id
    }

    fn pick_item(&self) -> PickItem {
        PickItem::new(self.id(), &self.name)
    }
}

/// Pulls the platform's error text out of a response body.
fn remote_message(body: &Value) -> String {
    body.pointer("/message/message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

pub struct MechanismClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: Zeroizing<String>,
}

impl MechanismClient {
    pub fn new(connection: &ServerConnection) -> Result<Self, PlatformError> {
        Self::with_parts(&connection.base_url, &connection.username, &connection.password)
    }

    pub fn with_parts(base_url: &str, username: &str, password: &str) -> Result<Self, PlatformError> {
        Ok(Self {
            http: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: Zeroizing::new(password.to_string()),
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}{BASE_PATH}{action}", self.base_url)
    }

    fn credentials(&self) -> [(&str, &str); 2] {
        [("username", self.username.as_str()), ("password", self.password.as_str())]
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, PlatformError> {
        let status = response.status();
        let body = response.text().await?;
        let value: Value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(_) if !status.is_success() => {
                return Err(PlatformError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
            Err(e) => return Err(PlatformError::Decode(format!("{e}"))),
        };
        if !status.is_success() {
            return Err(PlatformError::Remote(remote_message(&value)));
        }
        Ok(value)
    }

    pub async fn list(&self) -> Result<Vec<AttributionMechanism>, PlatformError> {
        let response = self
            .http
            .get(self.endpoint("getCustomAttributionMechanismList"))
            .query(&self.credentials())
            .send()
            .await?;
        let body = Self::read_json(response).await?;
        if !body.is_array() {
            return Err(PlatformError::Remote(remote_message(&body)));
        }
        let mechanisms: Vec<AttributionMechanism> =
            serde_json::from_value(body).map_err(|e| PlatformError::Decode(format!("{e}")))?;
        debug!(count = mechanisms.len(), "attribution mechanisms listed");
        Ok(mechanisms)
    }

    async fn post(&self, action: &str, mechanism: &AttributionMechanism) -> Result<(), PlatformError> {
        let response = self
            .http
            .post(self.endpoint(action))
            .query(&self.credentials())
            .json(mechanism)
            .send()
            .await?;
        let body = Self::read_json(response).await?;
        if body.get("content").and_then(Value::as_str) == Some("OK") {
            return Ok(());
        }
        Err(PlatformError::Remote(remote_message(&body)))
    }

    pub async fn create(&self, mechanism: &AttributionMechanism) -> Result<(), PlatformError> {
        self.post("createAttributionMechanism", mechanism).await
    }

    pub async fn update(&self, mechanism: &AttributionMechanism) -> Result<(), PlatformError> {
        self.post("updateAttributionMechanism", mechanism).await
    }

    pub async fn delete(&self, mechanism_id: &str) -> Result<(), PlatformError> {
        let response = self
            .http
            .delete(self.endpoint("deleteAttributionMechanism"))
            .query(&self.credentials())
            .query(&[("mechanismId", mechanism_id)])
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(PlatformError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Created(String),
    Updated(String),
    Cancelled,
}

async fn open_client(
    ctx: &mut AppContext,
    prompter: &mut dyn Prompter,
    server_id: Option<&str>,
) -> Result<Option<(ServerConnection, MechanismClient)>, MechanismError> {
    let Some(profile) = servers::select_server(&ctx.settings, prompter, server_id)? else {
        return Ok(None);
    };
    let Some(connection) = servers::open_connection(ctx, &profile, prompter)? else {
        return Ok(None);
    };
    let client = MechanismClient::new(&connection)?;
    Ok(Some((connection, client)))
}

/// Maps a server-supplied id to `<id>.js`, refusing anything that would leave
/// the mechanisms directory.
fn mechanism_file_name(id: &str) -> Result<String, MechanismError> {
    let file_name = format!("{id}.js");
    let single_component = Path::new(&file_name).file_name() == Some(OsStr::new(&file_name));
    if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") || !single_component {
        return Err(MechanismError::InvalidId(id.to_string()));
    }
    Ok(file_name)
}

fn save_mechanism_file(workspace: &Path, id: &str, script: &str) -> Result<PathBuf, MechanismError> {
    let file_name = mechanism_file_name(id)?;
    let dir = workspace.join(MECHANISMS_DIR);
    fs::create_dir_all(&dir).map_err(|e| MechanismError::Io(format!("{}: {e}", dir.display())))?;
    let path = dir.join(file_name);
    fs::write(&path, script).map_err(|e| MechanismError::Io(format!("{}: {e}", path.display())))?;
    info!(mechanism = %id, path = %path.display(), "mechanism imported");
    Ok(path)
}

/// Imports one mechanism chosen by the user into `mechanisms/<id>.js`.
pub async fn import_one(
    ctx: &mut AppContext,
    prompter: &mut dyn Prompter,
    server_id: Option<&str>,
) -> Result<Option<PathBuf>, MechanismError> {
    let Some((_, client)) = open_client(ctx, prompter, server_id).await? else {
        return Ok(None);
    };
    let mechanisms = client.list().await?;
    let items: Vec<PickItem> = mechanisms.iter().map(AttributionMechanism::pick_item).collect();
    let Some(mechanism) = prompter
        .pick("Select the attribution mechanism", &items)
        .and_then(|index| mechanisms.get(index))
    else {
        return Ok(None);
    };
    let path = save_mechanism_file(ctx.workspace(), mechanism.id(), &mechanism.attribution_mecanism_description)?;
    prompter.notify(
        Notice::Info,
        &format!("Attribution mechanism {} imported to {}", mechanism.id(), path.display()),
    );
    Ok(Some(path))
}

/// Imports every mechanism the user ticks.
pub async fn import_many(
    ctx: &mut AppContext,
    prompter: &mut dyn Prompter,
    server_id: Option<&str>,
) -> Result<Vec<PathBuf>, MechanismError> {
    let Some((_, client)) = open_client(ctx, prompter, server_id).await? else {
        return Ok(Vec::new());
    };
    let mechanisms = client.list().await?;
    let items: Vec<PickItem> = mechanisms.iter().map(AttributionMechanism::pick_item).collect();
    let mut written = Vec::new();
    for index in prompter.pick_many("Select the attribution mechanisms", &items) {
        let Some(mechanism) = mechanisms.get(index) else { continue };
        let path = match save_mechanism_file(ctx.workspace(), mechanism.id(), &mechanism.attribution_mecanism_description) {
            Ok(path) => path,
            Err(MechanismError::InvalidId(id)) => {
                warn!(mechanism = %id, "skipping mechanism with an unusable id");
                prompter.notify(Notice::Warning, &format!("Skipped mechanism {id:?}: not a valid file name"));
                continue;
            }
            Err(e) => return Err(e),
        };
        prompter.notify(Notice::Info, &format!("Attribution mechanism {} imported", mechanism.id()));
        written.push(path);
    }
    Ok(written)
}

/// Creates or updates a mechanism on the server from a local script file.
pub async fn export(
    ctx: &mut AppContext,
    prompter: &mut dyn Prompter,
    server_id: Option<&str>,
    file: &Path,
) -> Result<ExportOutcome, MechanismError> {
    let script = fs::read_to_string(file).map_err(|e| MechanismError::Io(format!("{}: {e}", file.display())))?;
    let Some((connection, client)) = open_client(ctx, prompter, server_id).await? else {
        return Ok(ExportOutcome::Cancelled);
    };
    let mechanisms = client.list().await?;

    let mut mechanism_id = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut items: Vec<PickItem> = Vec::with_capacity(mechanisms.len() + 1);
    if let Some(current) = mechanisms.iter().find(|m| m.id() == mechanism_id) {
        items.push(current.pick_item());
    }
    items.push(PickItem::new(NEW_MECHANISM_LABEL, ""));
    items.extend(mechanisms.iter().filter(|m| m.id() != mechanism_id).map(AttributionMechanism::pick_item));

    let Some(choice) = prompter
        .pick("Create or edit a custom mechanism?", &items)
        .and_then(|index| items.get(index))
    else {
        return Ok(ExportOutcome::Cancelled);
    };
    let is_new = choice.label == NEW_MECHANISM_LABEL;

    let mut mechanism = if is_new {
        loop {
            let Some(id) = prompter.input(
                "Custom mechanism code (no spaces or special characters)",
                "custom_mechanism",
                &mechanism_id,
            ) else {
                return Ok(ExportOutcome::Cancelled);
            };
            mechanism_id = id;
            if !mechanisms.iter().any(|m| m.id() == mechanism_id) {
                break;
            }
            prompter.notify(
                Notice::Warning,
                &format!("Mechanism \"{mechanism_id}\" already exists on server \"{}\"!", connection.name),
            );
        }
        AttributionMechanism::new_custom(connection.company_id, &mechanism_id)
    } else {
        mechanism_id = choice.label.clone();
        match mechanisms.iter().find(|m| m.id() == mechanism_id) {
            Some(existing) => existing.clone(),
            None => return Ok(ExportOutcome::Cancelled),
        }
    };

    let name_default = if mechanism.name.is_empty() { mechanism_id.clone() } else { mechanism.name.clone() };
    let Some(name) = prompter.input("Custom mechanism name", "Mechanism name", &name_default) else {
        return Ok(ExportOutcome::Cancelled);
    };
    let description_default = if mechanism.description.is_empty() {
        mechanism_id.clone()
    } else {
        mechanism.description.clone()
    };
    let Some(description) = prompter.input("Custom mechanism description", "Mechanism description", &description_default)
    else {
        return Ok(ExportOutcome::Cancelled);
    };

    mechanism.name = name;
    mechanism.description = description;
    mechanism.attribution_mecanism_description = script;

    if connection.confirm_exporting && !servers::confirm_password(&connection, prompter) {
        return Ok(ExportOutcome::Cancelled);
    }

    if is_new {
        client.create(&mechanism).await?;
    } else {
        client.update(&mechanism).await?;
    }
    info!(mechanism = %mechanism_id, server = %connection.id, created = is_new, "mechanism exported");
    prompter.notify(
        Notice::Info,
        &format!("Custom mechanism {mechanism_id} exported successfully!"),
    );

    Ok(if is_new {
        ExportOutcome::Created(mechanism_id)
    } else {
        ExportOutcome::Updated(mechanism_id)
    })
}

/// Deletes a mechanism the user picks, after asking for its id again.
pub async fn delete(
    ctx: &mut AppContext,
    prompter: &mut dyn Prompter,
    server_id: Option<&str>,
) -> Result<Option<String>, MechanismError> {
    let Some((connection, client)) = open_client(ctx, prompter, server_id).await? else {
        return Ok(None);
    };
    let mechanisms = client.list().await?;
    let items: Vec<PickItem> = mechanisms.iter().map(AttributionMechanism::pick_item).collect();
    let Some(mechanism) = prompter
        .pick("Select the attribution mechanism to delete", &items)
        .and_then(|index| mechanisms.get(index))
    else {
        return Ok(None);
    };
    let typed = prompter.input("Type the mechanism code to confirm deletion", mechanism.id(), "");
    if typed.as_deref() != Some(mechanism.id()) {
        return Ok(None);
    }
    if connection.confirm_exporting && !servers::confirm_password(&connection, prompter) {
        return Ok(None);
    }
    client.delete(mechanism.id()).await?;
    info!(mechanism = %mechanism.id(), server = %connection.id, "mechanism deleted");
    prompter.notify(Notice::Info, &format!("Attribution mechanism {} deleted", mechanism.id()));
    Ok(Some(mechanism.id().to_string()))
}
