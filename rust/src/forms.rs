//! Form fast export: pushes a form folder from the workspace to the server as a
//! new form, using the defaults saved in the fast-export settings.
//!
//! The form lives in `forms/<folder>/`. Every file except those under
//! `events/` becomes an attachment; `events/*.js` become custom events.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use base64::{engine::general_purpose::STANDARD, Engine};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::config::FastExportSettings;
use crate::context::AppContext;
use crate::platform::{http_client, PlatformError};
use crate::prompt::{Notice, Prompter};
use crate::servers::{self, ServerConnection, ServerError};

pub const FORMS_DIR: &str = "forms";
const CARD_INDEX_SERVICE_PATH: &str = "/webdesk/ECMCardIndexService";
const SERVICE_NAMESPACE: &str = "http://ws.dm.ecm.technology.totvs.com/";
const CHECK_PARENT_MESSAGE: &str = "Check the id of the folder the form is saved in!";

#[derive(Debug, Error)]
pub enum FormExportError {
    #[error("fast export settings are incomplete; run `fluig fast-export-config` first")]
    IncompleteSettings,
    #[error("default server {0} not found")]
    DefaultServerMissing(String),
    #[error("parent folder id {0:?} is not a number")]
    InvalidParentId(String),
    #[error("{0} is not inside a forms/ folder")]
    NotAForm(PathBuf),
    #[error("form file error: {0}")]
    Io(String),
    #[error("form export rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Fast-export defaults once every required value is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastExportDefaults {
    pub server_id: String,
    pub parent_id: i64,
    pub dataset_name: String,
    pub persistence_type: u8,
    pub description_field: String,
}

impl FastExportDefaults {
    pub fn from_settings(settings: &FastExportSettings) -> Result<Self, FormExportError> {
        let non_empty = |value: &Option<String>| value.as_deref().filter(|v| !v.trim().is_empty()).map(str::to_string);
        let (Some(server_id), Some(parent_id), Some(dataset_name), Some(persistence_type)) = (
            non_empty(&settings.default_server_id),
            non_empty(&settings.default_parent_id),
            non_empty(&settings.default_dataset_name),
            settings.default_persistence_type,
        ) else {
            return Err(FormExportError::IncompleteSettings);
        };
        let parent_id = parent_id
            .trim()
            .parse()
            .map_err(|_| FormExportError::InvalidParentId(parent_id.clone()))?;
        Ok(Self {
            server_id,
            parent_id,
            dataset_name,
            persistence_type,
            description_field: settings.default_description_field.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    /// Base64 of the file bytes.
    pub file_content: String,
    pub principal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomEvent {
    pub event_id: String,
    pub event_description: String,
    pub event_vers_ant: bool,
}

/// Everything sent to `createSimpleCardIndexWithDatasetPersisteType`.
#[derive(Clone)]
pub struct CardIndexRequest {
    pub username: String,
    pub password: Zeroizing<String>,
    pub company_id: u64,
    pub publisher_id: String,
    pub document_id: i64,
    pub document_description: String,
    pub card_description: String,
    pub dataset_name: String,
    pub attachments: Vec<Attachment>,
    pub custom_events: Vec<CustomEvent>,
    pub persistence_type: u8,
    pub parent_document_id: i64,
}

impl std::fmt::Debug for CardIndexRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardIndexRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("company_id", &self.company_id)
            .field("document_description", &self.document_description)
            .field("dataset_name", &self.dataset_name)
            .field("attachments", &self.attachments.len())
            .field("custom_events", &self.custom_events.len())
            .field("parent_document_id", &self.parent_document_id)
            .finish()
    }
}

static FORM_FOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|/)forms/([^/]+)").unwrap());
static FORM_NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:\d+ - )?(\w+)$").unwrap());
static XML_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|lt|gt|amp|quot|apos);").unwrap());
static WEB_SERVICE_MESSAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:\w+:)?webServiceMessage>([^<]*)</(?:\w+:)?webServiceMessage>").unwrap()
});

/// Returns `(folder, form name)` for any path inside `forms/<folder>/`.
/// A folder named `"12 - expense_report"` yields the form name `expense_report`.
pub fn form_identity(path: &Path) -> Result<(String, String), FormExportError> {
    let normalized = path.to_string_lossy().replace('\\', "/");
    let folder = FORM_FOLDER_RE
        .captures_iter(&normalized)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| FormExportError::NotAForm(path.to_path_buf()))?;
    let name = FORM_NAME_RE
        .captures(&folder)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| folder.clone());
    Ok((folder, name))
}

/// Lists files under `dir` matching `suffix`. The directory part is escaped,
/// so workspace paths containing `[`, `*` or `?` are taken literally.
fn glob_files(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, FormExportError> {
    let pattern = format!("{}/{suffix}", glob::Pattern::escape(&dir.to_string_lossy()));
    let mut files: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| FormExportError::Io(format!("bad pattern {pattern}: {e}")))?
        .filter_map(Result::ok)
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Collects attachments (everything outside `events/`) and custom events.
pub fn collect_form_files(
    form_folder: &Path,
    form_name: &str,
) -> Result<(Vec<Attachment>, Vec<CustomEvent>), FormExportError> {
    let events_dir = form_folder.join("events");
    let read = |path: &Path| fs::read(path).map_err(|e| FormExportError::Io(format!("{}: {e}", path.display())));

    let mut attachments = Vec::new();
    for path in glob_files(form_folder, "**/*.*")? {
        if path.starts_with(&events_dir) {
            continue;
        }
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let stem = path.file_stem().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        attachments.push(Attachment {
            file_content: STANDARD.encode(read(&path)?),
            principal: extension.contains("htm") && stem == form_name,
            file_name,
        });
    }

    let mut events = Vec::new();
    for path in glob_files(&events_dir, "*.js")? {
        let event_description = String::from_utf8_lossy(&read(&path)?).into_owned();
        events.push(CustomEvent {
            event_id: path.file_stem().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            event_description,
            event_vers_ant: false,
        });
    }

    debug!(
        folder = %form_folder.display(),
        attachments = attachments.len(),
        events = events.len(),
        "form files collected"
    );
    Ok((attachments, events))
}

fn escape_xml(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn element(name: &str, value: &str) -> String {
    format!("<{name}>{}</{name}>", escape_xml(value))
}

impl CardIndexRequest {
    /// Renders the SOAP 1.1 envelope for the card index service.
    pub fn to_soap(&self) -> String {
        let attachments: String = self
            .attachments
            .iter()
            .map(|a| {
                format!(
                    "<item>{}{}{}</item>",
                    element("fileName", &a.file_name),
                    element("filecontent", &a.file_content),
                    element("principal", if a.principal { "true" } else { "false" }),
                )
            })
            .collect();
        let events: String = self
            .custom_events
            .iter()
            .map(|e| {
                format!(
                    "<item>{}{}{}</item>",
                    element("eventDescription", &e.event_description),
                    element("eventId", &e.event_id),
                    element("eventVersAnt", if e.event_vers_ant { "true" } else { "false" }),
                )
            })
            .collect();

        format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ws="{ns}">"#,
                "<soap:Body><ws:createSimpleCardIndexWithDatasetPersisteType>",
                "{username}{password}{company}{publisher}{document_id}{document_description}",
                "{card_description}{dataset}<Attachments>{attachments}</Attachments>",
                "<customEvents>{events}</customEvents>{persistence}{parent}",
                "</ws:createSimpleCardIndexWithDatasetPersisteType></soap:Body></soap:Envelope>"
            ),
            ns = SERVICE_NAMESPACE,
            username = element("username", &self.username),
            password = element("password", &self.password),
            company = element("companyId", &self.company_id.to_string()),
            publisher = element("publisherId", &self.publisher_id),
            document_id = element("documentId", &self.document_id.to_string()),
            document_description = element("documentDescription", &self.document_description),
            card_description = element("cardDescription", &self.card_description),
            dataset = element("datasetName", &self.dataset_name),
            attachments = attachments,
            events = events,
            persistence = element("persistenceType", &self.persistence_type.to_string()),
            parent = element("parentDocumentId", &self.parent_document_id.to_string()),
        )
    }
}

/// Decodes the predefined XML entities and numeric character references.
/// Unknown or invalid references are left as they are.
fn unescape_xml(raw: &str) -> String {
    XML_ENTITY_RE
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => {
                    let code = match entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => entity[1..].parse().ok(),
                    };
                    code.and_then(char::from_u32)
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Extracts `webServiceMessage` from a SOAP response body.
pub fn web_service_message(body: &str) -> Option<String> {
    WEB_SERVICE_MESSAGE_RE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| unescape_xml(m.as_str().trim()))
}

pub struct CardIndexClient {
    http: reqwest::Client,
    endpoint: String,
}

impl CardIndexClient {
    pub fn new(base_url: &str) -> Result<Self, PlatformError> {
        Ok(Self {
            http: http_client()?,
            endpoint: format!("{}{CARD_INDEX_SERVICE_PATH}", base_url.trim_end_matches('/')),
        })
    }

    /// Sends the request and returns the platform's `webServiceMessage`.
    pub async fn create_card_index(&self, request: &CardIndexRequest) -> Result<Option<String>, PlatformError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", "\"\"")
            .body(request.to_soap())
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PlatformError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(web_service_message(&body))
    }
}

/// Builds the request for a form folder on behalf of `connection`.
pub fn build_request(
    connection: &ServerConnection,
    defaults: &FastExportDefaults,
    form_folder: &Path,
    form_name: &str,
) -> Result<CardIndexRequest, FormExportError> {
    let (attachments, custom_events) = collect_form_files(form_folder, form_name)?;
    Ok(CardIndexRequest {
        username: connection.username.clone(),
        password: connection.password.clone(),
        company_id: connection.company_id,
        publisher_id: connection.user_code.clone(),
        document_id: -1,
        document_description: form_name.to_string(),
        card_description: defaults.description_field.clone(),
        dataset_name: defaults.dataset_name.clone(),
        attachments,
        custom_events,
        persistence_type: defaults.persistence_type,
        parent_document_id: defaults.parent_id,
    })
}

/// Exports the form containing `path` as a new form on the default server.
pub async fn fast_export(
    ctx: &mut AppContext,
    prompter: &mut dyn Prompter,
    path: &Path,
) -> Result<Option<String>, FormExportError> {
    let defaults = FastExportDefaults::from_settings(&ctx.settings.fast_export)?;
    let profile = servers::find_by_id(&ctx.settings, &defaults.server_id)
        .cloned()
        .ok_or_else(|| FormExportError::DefaultServerMissing(defaults.server_id.clone()))?;
    let (folder, form_name) = form_identity(path)?;
    let form_folder = ctx.workspace().join(FORMS_DIR).join(&folder);

    let Some(connection) = servers::open_connection(ctx, &profile, prompter)? else {
        return Ok(None);
    };
    let request = build_request(&connection, &defaults, &form_folder, &form_name)?;
    let client = CardIndexClient::new(&connection.base_url)?;
    let message = client.create_card_index(&request).await?;

    match message.as_deref() {
        Some("ok") => {
            info!(form = %form_name, server = %connection.id, "form exported");
            prompter.notify(Notice::Info, &format!("Form {form_name} exported successfully!"));
            Ok(Some(form_name))
        }
        Some(other) if !other.is_empty() => Err(FormExportError::Rejected(other.to_string())),
        _ => Err(FormExportError::Rejected(CHECK_PARENT_MESSAGE.to_string())),
    }
}
