//! Server profiles: storage in the settings, password protection, and turning a
//! profile into a connection with a usable plaintext password.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::config::{ConfigError, Settings};
use crate::context::AppContext;
use crate::crypto::{self, CipherError, MachineSecret, StoredCredential};
use crate::prompt::{Notice, PickItem, Prompter};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server {0} not found")]
    NotFound(String),
    #[error("no servers configured")]
    NoneConfigured,
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerProfile {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub ssl: bool,
    pub port: u16,
    pub username: String,
    /// Stored credential string, never plaintext.
    pub password: String,
    pub company_id: u64,
    #[serde(default)]
    pub user_code: String,
    /// Ask for the password again before anything is exported.
    #[serde(default)]
    pub confirm_exporting: bool,
}

impl ServerProfile {
    pub fn base_url(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Values collected when a server is added or edited.
#[derive(Clone)]
pub struct ServerDraft {
    pub name: String,
    pub host: String,
    pub ssl: bool,
    pub port: u16,
    pub username: String,
    pub password: Zeroizing<String>,
    pub company_id: u64,
    pub user_code: String,
    pub confirm_exporting: bool,
}

/// A profile with its password decrypted for outbound calls.
pub struct ServerConnection {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub username: String,
    pub password: Zeroizing<String>,
    pub company_id: u64,
    pub user_code: String,
    pub confirm_exporting: bool,
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: usize,
    /// Profiles whose legacy password could not be decrypted.
    pub failed: Vec<String>,
}

pub fn find_by_id<'a>(settings: &'a Settings, id: &str) -> Option<&'a ServerProfile> {
    settings.configurations.iter().find(|server| server.id == id)
}

fn find_by_id_mut<'a>(settings: &'a mut Settings, id: &str) -> Result<&'a mut ServerProfile, ServerError> {
    settings
        .configurations
        .iter_mut()
        .find(|server| server.id == id)
        .ok_or_else(|| ServerError::NotFound(id.to_string()))
}

/// Adds a profile with a freshly generated id and returns that id.
pub fn add_server(settings: &mut Settings, draft: ServerDraft, secret: &MachineSecret) -> Result<String, ServerError> {
    let id = uuid::Uuid::new_v4().to_string();
    let password = crypto::encrypt(&draft.password, secret)?;
    settings.configurations.push(ServerProfile {
        id: id.clone(),
        name: draft.name,
        host: draft.host,
        ssl: draft.ssl,
        port: draft.port,
        username: draft.username,
        password,
        company_id: draft.company_id,
        user_code: draft.user_code,
        confirm_exporting: draft.confirm_exporting,
    });
    info!(server = %id, "server added");
    Ok(id)
}

/// Replaces every field of an existing profile, re-encrypting the password.
pub fn update_server(
    settings: &mut Settings,
    id: &str,
    draft: ServerDraft,
    secret: &MachineSecret,
) -> Result<(), ServerError> {
    let password = crypto::encrypt(&draft.password, secret)?;
    let profile = find_by_id_mut(settings, id)?;
    *profile = ServerProfile {
        id: profile.id.clone(),
        name: draft.name,
        host: draft.host,
        ssl: draft.ssl,
        port: draft.port,
        username: draft.username,
        password,
        company_id: draft.company_id,
        user_code: draft.user_code,
        confirm_exporting: draft.confirm_exporting,
    };
    info!(server = %id, "server updated");
    Ok(())
}

/// Stores a new password. The previous envelope is discarded, never reused.
pub fn set_password(settings: &mut Settings, id: &str, plaintext: &str, secret: &MachineSecret) -> Result<(), ServerError> {
    let password = crypto::encrypt(plaintext, secret)?;
    find_by_id_mut(settings, id)?.password = password;
    Ok(())
}

pub fn remove_server(settings: &mut Settings, id: &str) -> Result<ServerProfile, ServerError> {
    let index = settings
        .configurations
        .iter()
        .position(|server| server.id == id)
        .ok_or_else(|| ServerError::NotFound(id.to_string()))?;
    if settings.fast_export.default_server_id.as_deref() == Some(id) {
        settings.fast_export.default_server_id = None;
    }
    info!(server = %id, "server removed");
    Ok(settings.configurations.remove(index))
}

/// Decrypts the profile's password. The flag reports a legacy-format password.
pub fn connect(profile: &ServerProfile, secret: &MachineSecret) -> Result<(ServerConnection, bool), CipherError> {
    let stored = StoredCredential::classify(&profile.password)?;
    let password = Zeroizing::new(stored.decrypt(secret)?);
    let connection = ServerConnection {
        id: profile.id.clone(),
        name: profile.name.clone(),
        base_url: profile.base_url(),
        username: profile.username.clone(),
        password,
        company_id: profile.company_id,
        user_code: profile.user_code.clone(),
        confirm_exporting: profile.confirm_exporting,
    };
    Ok((connection, stored.needs_migration()))
}

/// Re-encrypts every legacy password into the envelope format.
pub fn migrate_legacy_passwords(settings: &mut Settings, secret: &MachineSecret) -> MigrationReport {
    let mut report = MigrationReport::default();
    for profile in settings.configurations.iter_mut() {
        let stored = match StoredCredential::classify(&profile.password) {
            Ok(stored) if stored.needs_migration() => stored,
            _ => continue,
        };
        let upgraded = stored
            .decrypt(secret)
            .and_then(|plaintext| crypto::encrypt(&Zeroizing::new(plaintext), secret));
        match upgraded {
            Ok(envelope) => {
                profile.password = envelope;
                report.migrated += 1;
                info!(server = %profile.id, "legacy password migrated");
            }
            Err(e) => {
                warn!(server = %profile.id, error = %e, "legacy password could not be migrated");
                report.failed.push(profile.id.clone());
            }
        }
    }
    report
}

/// Picks a server: the preferred id when given, otherwise asks the user.
pub fn select_server(
    settings: &Settings,
    prompter: &mut dyn Prompter,
    preferred: Option<&str>,
) -> Result<Option<ServerProfile>, ServerError> {
    if let Some(id) = preferred {
        return find_by_id(settings, id)
            .cloned()
            .map(Some)
            .ok_or_else(|| ServerError::NotFound(id.to_string()));
    }
    if settings.configurations.is_empty() {
        return Err(ServerError::NoneConfigured);
    }
    let items: Vec<PickItem> = settings
        .configurations
        .iter()
        .map(|server| PickItem::new(&server.name, server.base_url()))
        .collect();
    Ok(prompter
        .pick("Select the server", &items)
        .and_then(|index| settings.configurations.get(index).cloned()))
}

/// Opens a connection for `profile`. A legacy password is upgraded in place;
/// an unusable one is re-entered by the user and saved as a new envelope.
/// Returns `None` when the user cancels re-entry.
pub fn open_connection(
    ctx: &mut AppContext,
    profile: &ServerProfile,
    prompter: &mut dyn Prompter,
) -> Result<Option<ServerConnection>, ServerError> {
    let secret = ctx.secret.get()?;
    match connect(profile, secret) {
        Ok((connection, legacy)) => {
            if legacy {
                set_password(&mut ctx.settings, &profile.id, &connection.password, secret)?;
                ctx.persist()?;
                info!(server = %profile.id, "legacy password upgraded on use");
            }
            Ok(Some(connection))
        }
        Err(e) => {
            warn!(server = %profile.id, error = %e, "stored password unusable");
            prompter.notify(
                Notice::Warning,
                &format!("The saved password for \"{}\" can no longer be read.", profile.name),
            );
            let Some(password) = prompter.password(&format!("Password for {}@{}", profile.username, profile.name)) else {
                return Ok(None);
            };
            let password = Zeroizing::new(password);
            set_password(&mut ctx.settings, &profile.id, &password, secret)?;
            ctx.persist()?;
            let refreshed = find_by_id(&ctx.settings, &profile.id)
                .cloned()
                .ok_or_else(|| ServerError::NotFound(profile.id.clone()))?;
            Ok(Some(connect(&refreshed, secret)?.0))
        }
    }
}

/// Asks the user to type the server password again before an export.
pub fn confirm_password(connection: &ServerConnection, prompter: &mut dyn Prompter) -> bool {
    let Some(typed) = prompter.password(&format!("Confirm the password for {}", connection.name)) else {
        return false;
    };
    let typed = Zeroizing::new(typed);
    if typed.as_str() == connection.password.as_str() {
        return true;
    }
    prompter.notify(Notice::Error, "Incorrect password.");
    false
}

/// Asks for a number until the answer parses. `None` only when the user cancels.
fn prompt_number<T: std::str::FromStr>(
    prompter: &mut dyn Prompter,
    prompt: &str,
    placeholder: &str,
    default: &str,
) -> Option<T> {
    loop {
        let answer = prompter.input(prompt, placeholder, default)?;
        match answer.trim().parse() {
            Ok(value) => return Some(value),
            Err(_) => prompter.notify(Notice::Error, &format!("\"{answer}\" is not a valid {}.", prompt.to_lowercase())),
        }
    }
}

/// Collects a server definition interactively. `current` prefills the answers.
pub fn prompt_server_draft(prompter: &mut dyn Prompter, current: Option<&ServerProfile>) -> Option<ServerDraft> {
    let name = prompter.input("Server name", "Production", current.map_or("", |c| c.name.as_str()))?;
    let host = prompter.input("Host (without scheme)", "fluig.example.com", current.map_or("", |c| c.host.as_str()))?;
    let ssl_default = if current.map_or(true, |c| c.ssl) { "yes" } else { "no" };
    let ssl = prompter.input("Use HTTPS? (yes/no)", "yes", ssl_default)?;
    let ssl = matches!(ssl.to_ascii_lowercase().as_str(), "y" | "yes" | "s" | "sim" | "true");
    let port_default = current
        .map(|c| c.port.to_string())
        .unwrap_or_else(|| (if ssl { "443" } else { "80" }).to_string());
    let port = prompt_number(prompter, "Port", "443", &port_default)?;
    let username = prompter.input("Username", "admin", current.map_or("", |c| c.username.as_str()))?;
    let password = Zeroizing::new(prompter.password("Password")?);
    let company_default = current.map(|c| c.company_id.to_string()).unwrap_or_else(|| "1".to_string());
    let company_id = prompt_number(prompter, "Company id", "1", &company_default)?;
    let user_code = prompter.input("User code", "admin", current.map_or(username.as_str(), |c| c.user_code.as_str()))?;
    let confirm_default = if current.map_or(false, |c| c.confirm_exporting) { "yes" } else { "no" };
    let confirm = prompter.input("Confirm password before exporting? (yes/no)", "no", confirm_default)?;
    let confirm_exporting = matches!(confirm.to_ascii_lowercase().as_str(), "y" | "yes" | "s" | "sim" | "true");

    Some(ServerDraft {
        name,
        host,
        ssl,
        port,
        username,
        password,
        company_id,
        user_code,
        confirm_exporting,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{context_in, TEST_SECRET};
    use crate::prompt::scripted::{Answer, ScriptedPrompter};
    use tempfile::tempdir;

    const LEGACY_HUNTER2: &str = "U2FsdGVkX18BAgMEBQYHCA5zfP6ibR3LJkxgqlZ78OQ=";

    fn secret() -> MachineSecret {
        MachineSecret::new(TEST_SECRET).unwrap()
    }

    fn draft(password: &str) -> ServerDraft {
        ServerDraft {
            name: "Homologação".to_string(),
            host: "fluig.example.com".to_string(),
            ssl: true,
            port: 8443,
            username: "admin".to_string(),
            password: Zeroizing::new(password.to_string()),
            company_id: 1,
            user_code: "admin".to_string(),
            confirm_exporting: false,
        }
    }

    fn settings_with_password(stored: &str) -> Settings {
        let mut settings = Settings::default();
        settings.configurations.push(ServerProfile {
            id: "srv-1".to_string(),
            name: "Produção".to_string(),
            host: "fluig.local".to_string(),
            ssl: false,
            port: 8080,
            username: "admin".to_string(),
            password: stored.to_string(),
            company_id: 1,
            user_code: "admin".to_string(),
            confirm_exporting: true,
        });
        settings
    }

    #[test]
    fn builds_base_url() {
        let settings = settings_with_password("x");
        assert_eq!(settings.configurations[0].base_url(), "http://fluig.local:8080");
    }

    #[test]
    fn added_servers_store_envelopes_not_plaintext() {
        let mut settings = Settings::default();
        let id = add_server(&mut settings, draft("hunter2"), &secret()).unwrap();
        let profile = find_by_id(&settings, &id).unwrap();
        assert_ne!(profile.password, "hunter2");
        assert_eq!(crypto::decrypt(&profile.password, &secret()).unwrap(), "hunter2");

        let (connection, legacy) = connect(profile, &secret()).unwrap();
        assert!(!legacy);
        assert_eq!(connection.password.as_str(), "hunter2");
        assert_eq!(connection.base_url, "https://fluig.example.com:8443");
        assert!(!format!("{connection:?}").contains("hunter2"));
    }

    #[test]
    fn changing_password_produces_new_envelope() {
        let mut settings = Settings::default();
        let id = add_server(&mut settings, draft("hunter2"), &secret()).unwrap();
        let before = find_by_id(&settings, &id).unwrap().password.clone();
        set_password(&mut settings, &id, "hunter2", &secret()).unwrap();
        let after = find_by_id(&settings, &id).unwrap().password.clone();
        assert_ne!(before, after);
    }

    #[test]
    fn update_keeps_id() {
        let mut settings = Settings::default();
        let id = add_server(&mut settings, draft("hunter2"), &secret()).unwrap();
        let mut changed = draft("swordfish");
        changed.name = "Renamed".to_string();
        update_server(&mut settings, &id, changed, &secret()).unwrap();
        let profile = find_by_id(&settings, &id).unwrap();
        assert_eq!(profile.name, "Renamed");
        assert_eq!(connect(profile, &secret()).unwrap().0.password.as_str(), "swordfish");
    }

    #[test]
    fn removing_default_server_clears_fast_export_default() {
        let mut settings = settings_with_password("x");
        settings.fast_export.default_server_id = Some("srv-1".to_string());
        remove_server(&mut settings, "srv-1").unwrap();
        assert!(settings.configurations.is_empty());
        assert_eq!(settings.fast_export.default_server_id, None);
        assert!(matches!(remove_server(&mut settings, "srv-1"), Err(ServerError::NotFound(_))));
    }

    #[test]
    fn migrates_legacy_passwords() {
        let mut settings = settings_with_password(LEGACY_HUNTER2);
        let report = migrate_legacy_passwords(&mut settings, &secret());
        assert_eq!(report, MigrationReport { migrated: 1, failed: vec![] });
        let stored = &settings.configurations[0].password;
        assert_eq!(crypto::decrypt(stored, &secret()).unwrap(), "hunter2");

        let again = migrate_legacy_passwords(&mut settings, &secret());
        assert_eq!(again.migrated, 0);
    }

    #[test]
    fn migration_reports_unreadable_legacy_passwords() {
        let mut settings = settings_with_password(LEGACY_HUNTER2);
        let other = MachineSecret::new("machine-xyz").unwrap();
        let report = migrate_legacy_passwords(&mut settings, &other);
        assert_eq!(report.failed, vec!["srv-1".to_string()]);
        assert_eq!(settings.configurations[0].password, LEGACY_HUNTER2);
    }

    #[test]
    fn open_connection_upgrades_legacy_password() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path(), settings_with_password(LEGACY_HUNTER2));
        let profile = ctx.settings.configurations[0].clone();
        let mut prompter = ScriptedPrompter::new(vec![]);

        let connection = open_connection(&mut ctx, &profile, &mut prompter).unwrap().unwrap();
        assert_eq!(connection.password.as_str(), "hunter2");

        let saved = Settings::load(&ctx.settings_path).unwrap();
        let stored = StoredCredential::classify(&saved.configurations[0].password).unwrap();
        assert!(!stored.needs_migration());
    }

    #[test]
    fn open_connection_asks_again_when_password_is_unusable() {
        let dir = tempdir().unwrap();
        let foreign = crypto::encrypt("old", &MachineSecret::new("other-machine").unwrap()).unwrap();
        let mut ctx = context_in(dir.path(), settings_with_password(&foreign));
        let profile = ctx.settings.configurations[0].clone();
        let mut prompter = ScriptedPrompter::new(vec![Answer::Password(Some("fresh".to_string()))]);

        let connection = open_connection(&mut ctx, &profile, &mut prompter).unwrap().unwrap();
        assert_eq!(connection.password.as_str(), "fresh");
        assert!(prompter.has(Notice::Warning, "can no longer be read"));

        let saved = Settings::load(&ctx.settings_path).unwrap();
        assert_eq!(crypto::decrypt(&saved.configurations[0].password, ctx.secret.get().unwrap()).unwrap(), "fresh");
    }

    #[test]
    fn open_connection_cancelled_reentry() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path(), settings_with_password("not-an-envelope"));
        let profile = ctx.settings.configurations[0].clone();
        let mut prompter = ScriptedPrompter::new(vec![Answer::Password(None)]);
        assert!(open_connection(&mut ctx, &profile, &mut prompter).unwrap().is_none());
    }

    #[test]
    fn confirms_password() {
        let settings = settings_with_password(&crypto::encrypt("hunter2", &secret()).unwrap());
        let (connection, _) = connect(&settings.configurations[0], &secret()).unwrap();

        let mut prompter = ScriptedPrompter::new(vec![Answer::Password(Some("hunter2".to_string()))]);
        assert!(confirm_password(&connection, &mut prompter));

        let mut prompter = ScriptedPrompter::new(vec![Answer::Password(Some("wrong".to_string()))]);
        assert!(!confirm_password(&connection, &mut prompter));
        assert!(prompter.has(Notice::Error, "Incorrect password"));
    }

    #[test]
    fn selects_preferred_or_prompted_server() {
        let settings = settings_with_password("x");
        let mut prompter = ScriptedPrompter::new(vec![Answer::Pick(Some(0))]);
        let picked = select_server(&settings, &mut prompter, None).unwrap().unwrap();
        assert_eq!(picked.id, "srv-1");

        let mut silent = ScriptedPrompter::new(vec![]);
        assert!(select_server(&settings, &mut silent, Some("srv-1")).unwrap().is_some());
        assert!(matches!(
            select_server(&settings, &mut silent, Some("nope")),
            Err(ServerError::NotFound(_))
        ));
        assert!(matches!(
            select_server(&Settings::default(), &mut silent, None),
            Err(ServerError::NoneConfigured)
        ));
    }

    #[test]
    fn prompts_for_server_draft() {
        let mut prompter = ScriptedPrompter::new(vec![
            Answer::Input(Some("Dev".to_string())),
            Answer::Input(Some("dev.fluig.local".to_string())),
            Answer::Input(Some("no".to_string())),
            Answer::Input(Some("8080".to_string())),
            Answer::Input(Some("dev-user".to_string())),
            Answer::Password(Some("pw".to_string())),
            Answer::Input(Some("2".to_string())),
            Answer::Input(Some("dev-user".to_string())),
            Answer::Input(Some("yes".to_string())),
        ]);
        let draft = prompt_server_draft(&mut prompter, None).expect("all answers given");
        assert!(!draft.ssl);
        assert_eq!(draft.port, 8080);
        assert_eq!(draft.company_id, 2);
        assert!(draft.confirm_exporting);
        assert_eq!(prompter.input_defaults[3], "80");
    }

    #[test]
    fn mistyped_numbers_are_asked_again() {
        let mut prompter = ScriptedPrompter::new(vec![
            Answer::Input(Some("Dev".to_string())),
            Answer::Input(Some("dev.fluig.local".to_string())),
            Answer::Input(Some("no".to_string())),
            Answer::Input(Some("80a".to_string())),
            Answer::Input(Some("8080".to_string())),
            Answer::Input(Some("dev-user".to_string())),
            Answer::Password(Some("pw".to_string())),
            Answer::Input(Some("one".to_string())),
            Answer::Input(Some("3".to_string())),
            Answer::Input(Some("dev-user".to_string())),
            Answer::Input(Some("no".to_string())),
        ]);
        let draft = prompt_server_draft(&mut prompter, None).expect("retyped answers accepted");
        assert_eq!(draft.port, 8080);
        assert_eq!(draft.company_id, 3);
        assert!(prompter.has(Notice::Error, "\"80a\" is not a valid port"));
        assert!(prompter.has(Notice::Error, "\"one\" is not a valid company id"));
        // The retry offers the same default as the first attempt.
        assert_eq!(prompter.input_defaults[3], "80");
        assert_eq!(prompter.input_defaults[4], "80");
    }

    #[test]
    fn cancelling_a_number_prompt_cancels_the_draft() {
        let mut prompter = ScriptedPrompter::new(vec![
            Answer::Input(Some("Dev".to_string())),
            Answer::Input(Some("dev.fluig.local".to_string())),
            Answer::Input(Some("yes".to_string())),
            Answer::Input(Some("x".to_string())),
            Answer::Input(None),
        ]);
        assert!(prompt_server_draft(&mut prompter, None).is_none());
    }
}
