//! `fluig` command line. Every command loads the settings file, runs one
//! flow against the workspace, and saves the settings back when it changed
//! them.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use fluig_rs::config::resolve_settings_path;
use fluig_rs::context::AppContext;
use fluig_rs::crypto::{self, LazyMachineSecret, MachineSecret};
use fluig_rs::mechanisms::{self, ExportOutcome};
use fluig_rs::prompt::{Notice, Prompter, TerminalPrompter};
use fluig_rs::{forms, servers, view, FluigError};

#[derive(Debug, Parser)]
#[command(name = "fluig", version, about = "Manage Fluig servers, attribution mechanisms and forms")]
struct Cli {
    /// Settings file (defaults to $FLUIG_CONFIG, then the user config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Workspace holding `mechanisms/` and `forms/` (defaults to the current dir).
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage server profiles.
    #[command(subcommand)]
    Server(ServerCommand),
    /// Import, export and delete attribution mechanisms.
    #[command(subcommand)]
    Mechanism(MechanismCommand),
    /// Form operations.
    #[command(subcommand)]
    Form(FormCommand),
    /// Show or save the fast export defaults.
    #[command(subcommand)]
    FastExportConfig(FastExportConfigCommand),
    /// Encrypt or decrypt a credential with this machine's secret.
    #[command(subcommand)]
    Credential(CredentialCommand),
}

#[derive(Debug, Subcommand)]
enum ServerCommand {
    List,
    Add,
    Edit { id: String },
    Remove { id: String },
    /// Re-encrypt legacy passwords in the current format.
    Migrate,
}

#[derive(Debug, Subcommand)]
enum MechanismCommand {
    Import {
        #[arg(long)]
        server: Option<String>,
    },
    ImportMany {
        #[arg(long)]
        server: Option<String>,
    },
    Export {
        file: PathBuf,
        #[arg(long)]
        server: Option<String>,
    },
    Delete {
        #[arg(long)]
        server: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum FormCommand {
    /// Create a new form on the default server from any file inside it.
    FastExport { path: PathBuf },
}

#[derive(Debug, Subcommand)]
enum FastExportConfigCommand {
    /// Render the configuration form as HTML.
    Show {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Apply the JSON message produced by the configuration form.
    Save { message: String },
}

#[derive(Debug, Subcommand)]
enum CredentialCommand {
    Encrypt { plaintext: String },
    Decrypt { stored: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), FluigError> {
    let command = match cli.command {
        Command::Credential(command) => return run_credential(command, &MachineSecret::from_environment()?),
        other => other,
    };

    let settings_path = resolve_settings_path(cli.config)?;
    let workspace = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    debug!(settings = %settings_path.display(), workspace = %workspace.display(), "loading context");
    // Only commands that encrypt or decrypt a password resolve the machine secret.
    let mut ctx = AppContext::load(settings_path, LazyMachineSecret::from_environment(), workspace)?;
    let mut prompter = TerminalPrompter;

    match command {
        Command::Server(command) => run_server(command, &mut ctx, &mut prompter),
        Command::Mechanism(command) => run_mechanism(command, &mut ctx, &mut prompter).await,
        Command::Form(FormCommand::FastExport { path }) => {
            if let Some(name) = forms::fast_export(&mut ctx, &mut prompter, &path).await? {
                println!("{name}");
            }
            Ok(())
        }
        Command::FastExportConfig(command) => run_fast_export_config(command, &mut ctx),
        Command::Credential(_) => Ok(()),
    }
}

fn run_credential(command: CredentialCommand, secret: &MachineSecret) -> Result<(), FluigError> {
    match command {
        CredentialCommand::Encrypt { plaintext } => println!("{}", crypto::encrypt(&plaintext, secret)?),
        CredentialCommand::Decrypt { stored } => println!("{}", crypto::decrypt_stored(&stored, secret)?),
    }
    Ok(())
}

fn run_server(command: ServerCommand, ctx: &mut AppContext, prompter: &mut dyn Prompter) -> Result<(), FluigError> {
    match command {
        ServerCommand::List => {
            for server in &ctx.settings.configurations {
                println!("{}\t{}\t{}\t{}", server.id, server.name, server.base_url(), server.username);
            }
        }
        ServerCommand::Add => {
            let secret = ctx.secret.get()?;
            let Some(draft) = servers::prompt_server_draft(prompter, None) else {
                return Ok(());
            };
            let id = servers::add_server(&mut ctx.settings, draft, secret)?;
            ctx.persist()?;
            println!("{id}");
        }
        ServerCommand::Edit { id } => {
            let secret = ctx.secret.get()?;
            let current = servers::find_by_id(&ctx.settings, &id)
                .cloned()
                .ok_or(servers::ServerError::NotFound(id.clone()))?;
            let Some(draft) = servers::prompt_server_draft(prompter, Some(&current)) else {
                return Ok(());
            };
            servers::update_server(&mut ctx.settings, &id, draft, secret)?;
            ctx.persist()?;
        }
        ServerCommand::Remove { id } => {
            let removed = servers::remove_server(&mut ctx.settings, &id)?;
            ctx.persist()?;
            prompter.notify(Notice::Info, &format!("Server \"{}\" removed.", removed.name));
        }
        ServerCommand::Migrate => {
            let secret = ctx.secret.get()?;
            let report = servers::migrate_legacy_passwords(&mut ctx.settings, secret);
            if report.migrated > 0 {
                ctx.persist()?;
            }
            prompter.notify(Notice::Info, &format!("{} password(s) migrated.", report.migrated));
            for id in &report.failed {
                prompter.notify(Notice::Warning, &format!("Could not migrate the password of server {id}."));
            }
        }
    }
    Ok(())
}

async fn run_mechanism(
    command: MechanismCommand,
    ctx: &mut AppContext,
    prompter: &mut dyn Prompter,
) -> Result<(), FluigError> {
    match command {
        MechanismCommand::Import { server } => {
            if let Some(path) = mechanisms::import_one(ctx, prompter, server.as_deref()).await? {
                println!("{}", path.display());
            }
        }
        MechanismCommand::ImportMany { server } => {
            for path in mechanisms::import_many(ctx, prompter, server.as_deref()).await? {
                println!("{}", path.display());
            }
        }
        MechanismCommand::Export { file, server } => {
            match mechanisms::export(ctx, prompter, server.as_deref(), &file).await? {
                ExportOutcome::Created(id) => println!("created {id}"),
                ExportOutcome::Updated(id) => println!("updated {id}"),
                ExportOutcome::Cancelled => {}
            }
        }
        MechanismCommand::Delete { server } => {
            if let Some(id) = mechanisms::delete(ctx, prompter, server.as_deref()).await? {
                println!("deleted {id}");
            }
        }
    }
    Ok(())
}

fn run_fast_export_config(command: FastExportConfigCommand, ctx: &mut AppContext) -> Result<(), FluigError> {
    match command {
        FastExportConfigCommand::Show { out } => {
            let html = view::render_fast_export_config(&ctx.settings)?;
            match out {
                Some(path) => fs::write(&path, html)?,
                None => println!("{html}"),
            }
        }
        FastExportConfigCommand::Save { message } => {
            let message = view::ViewMessage::from_json(&message)?;
            if view::handle_message(&mut ctx.settings, &message)? {
                ctx.persist()?;
            }
        }
    }
    Ok(())
}
