mod cli;

use std::io::{IsTerminal, Read as _};

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use unicode_width::UnicodeWidthStr;

use gascp::app::App;
use gascp::deploy::EnvSlot;
use gascp::error::Error;
use gascp::pathspec::FileKind;
use gascp::worktree::WorktreeAddRequest;
use gascp::writeflow::WriteRequest;

use crate::cli::{Cli, Commands, ConfigCmd, DeployCmd, WorktreeCmd};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init {
            script_id,
            name,
            force,
        } => block_on(cmd_init(&script_id, name.as_deref(), force)),
        Commands::Create { title, name } => block_on(cmd_create(&title, name.as_deref())),
        Commands::List { json, remote } => block_on(cmd_list(json, remote)),
        Commands::Use { name } => block_on(cmd_use(&name)),
        Commands::Cat { path, remote } => block_on(cmd_cat(&path, remote)),
        Commands::Write {
            path,
            file,
            expected_hash,
            force,
            allow_new_local,
        } => block_on(cmd_write(CmdWrite {
            path: &path,
            file: file.as_deref(),
            expected_hash,
            force,
            allow_new_local,
        })),
        Commands::Status { path, json } => block_on(cmd_status(&path, json)),
        Commands::CacheClear { script_id } => block_on(cmd_cache_clear(&script_id)),
        Commands::Auth => cmd_auth(),
        Commands::Deploy { cmd } => block_on(cmd_deploy(cmd)),
        Commands::Worktree { cmd } => block_on(cmd_worktree(cmd)),
        Commands::Config { cmd } => block_on(cmd_config(cmd)),
        Commands::McpServer => gascp::mcp::run_server(),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "gascp", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn block_on<F: std::future::Future<Output = Result<()>>>(fut: F) -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(fut)
}

fn app() -> Result<App> {
    App::from_env().map_err(render_error)
}

/// CLI-side rendering of the structured error envelope.
fn render_error(err: Error) -> anyhow::Error {
    let envelope = err.envelope();
    let hints = envelope
        .get("hints")
        .and_then(|h| serde_json::to_string_pretty(h).ok());
    match hints {
        Some(hints) => anyhow::anyhow!("{err}\nhints: {hints}"),
        None => anyhow::anyhow!("{err}"),
    }
}

async fn cmd_init(script_id: &str, name: Option<&str>, force: bool) -> Result<()> {
    let app = app()?;
    let result = app
        .project_init(script_id, name, force)
        .await
        .map_err(render_error)?;
    println!("Initialized {} ({} files)", result.name, result.files);
    for warning in &result.verification_warnings {
        println!(
            "  helper {}: {:?}; {}",
            warning.file,
            warning.status,
            warning.advice.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn cmd_create(title: &str, name: Option<&str>) -> Result<()> {
    let app = app()?;
    let result = app
        .project_create(title, name)
        .await
        .map_err(render_error)?;
    println!("Created {} as {}", result.script_id, result.name);
    Ok(())
}

async fn cmd_list(json: bool, remote: bool) -> Result<()> {
    let app = app()?;
    if remote {
        let projects = app
            .drive
            .list_script_projects()
            .await
            .map_err(render_error)?;
        if json {
            let rows: Vec<serde_json::Value> = projects
                .iter()
                .map(|p| serde_json::json!({ "scriptId": p.id, "name": p.name }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        } else {
            for p in projects {
                println!("{}  {}", p.id, p.name);
            }
        }
        return Ok(());
    }
    let cfg = app.config.load().map_err(render_error)?;
    if json {
        let rows: Vec<serde_json::Value> = cfg
            .projects
            .iter()
            .map(|(name, entry)| {
                serde_json::json!({
                    "name": name,
                    "scriptId": entry.script_id,
                    "lastSync": entry.last_sync,
                    "current": cfg.current_project.as_deref() == Some(name.as_str()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    let stdout_is_tty = std::io::stdout().is_terminal();
    let max_width = cfg
        .projects
        .keys()
        .map(|name| UnicodeWidthStr::width(name.as_str()))
        .max()
        .unwrap_or(0);
    for (name, entry) in &cfg.projects {
        let marker = if cfg.current_project.as_deref() == Some(name.as_str()) {
            "*"
        } else {
            " "
        };
        let width = UnicodeWidthStr::width(name.as_str());
        let colored = if stdout_is_tty {
            name.clone().bold().bright_cyan().to_string()
        } else {
            name.clone()
        };
        let padding = " ".repeat(max_width.saturating_sub(width) + 2);
        println!("{marker} {colored}{padding}{}", entry.script_id);
    }
    Ok(())
}

async fn cmd_use(name: &str) -> Result<()> {
    let app = app()?;
    let name_owned = name.to_string();
    app.config
        .update("project use", move |cfg| {
            if !cfg.projects.contains_key(&name_owned) {
                return Err(Error::validation(format!("unknown project: {name_owned}")));
            }
            cfg.current_project = Some(name_owned.clone());
            Ok(())
        })
        .await
        .map_err(render_error)?;
    println!("ok");
    Ok(())
}

async fn cmd_cat(path: &str, remote: bool) -> Result<()> {
    let app = app()?;
    let result = app.cat(path, !remote).await.map_err(render_error)?;
    print!("{}", result.content);
    Ok(())
}

struct CmdWrite<'a> {
    path: &'a str,
    file: Option<&'a str>,
    expected_hash: Option<String>,
    force: bool,
    allow_new_local: bool,
}

async fn cmd_write(args: CmdWrite<'_>) -> Result<()> {
    let content = match args.file {
        Some(src) => std::fs::read_to_string(src).with_context(|| format!("reading {src}"))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let app = app()?;
    let cfg = app.config.load().map_err(render_error)?;
    let resolved =
        gascp::pathspec::resolve(args.path, cfg.current_script_id()).map_err(render_error)?;
    let kind = if gascp::pathspec::is_manifest(args.path) {
        FileKind::Json
    } else {
        args.path
            .rsplit_once('.')
            .and_then(|(_, ext)| FileKind::from_extension(ext))
            .unwrap_or(FileKind::ServerJs)
    };
    let outcome = app
        .pipeline()
        .map_err(render_error)?
        .execute(WriteRequest {
            script_id: resolved.script_id,
            filename: resolved.file_path,
            kind,
            content,
            expected_hash: args.expected_hash,
            force: args.force,
            allow_new_local: args.allow_new_local,
            skip_sync_check: false,
            position: None,
        })
        .await
        .map_err(render_error)?;
    println!(
        "Wrote {}/{} ({} of {} files); hash {}",
        outcome.script_id,
        outcome.filename,
        outcome.position + 1,
        outcome.total_files,
        outcome.hash
    );
    if let Some(git) = &outcome.git {
        println!(
            "  committed {} on {}{}",
            git.commit,
            git.branch,
            if git.hook_modified {
                " (hooks reformatted the file)"
            } else {
                ""
            }
        );
    }
    Ok(())
}

async fn cmd_status(path: &str, json: bool) -> Result<()> {
    let app = app()?;
    let status = app.file_status(path).await.map_err(render_error)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    println!(
        "{}/{}: {}",
        status.script_id,
        status.filename,
        if status.in_sync { "in sync" } else { "OUT OF SYNC" }
    );
    println!("  local:  {}", status.local_hash.as_deref().unwrap_or("-"));
    println!("  remote: {}", status.remote_hash.as_deref().unwrap_or("-"));
    println!("  cached: {}", status.cached_hash.as_deref().unwrap_or("-"));
    Ok(())
}

async fn cmd_cache_clear(script_id: &str) -> Result<()> {
    let app = app()?;
    let cleared = app.cache_clear(script_id).await.map_err(render_error)?;
    println!("Cleared cached metadata on {cleared} file(s)");
    Ok(())
}

fn cmd_auth() -> Result<()> {
    let app = app()?;
    let status = app.auth_status();
    if status.authenticated {
        println!("authenticated ({})", status.source);
    } else {
        println!("not authenticated; export GASCP_ACCESS_TOKEN for this session");
    }
    Ok(())
}

async fn cmd_deploy(cmd: DeployCmd) -> Result<()> {
    let app = app()?;
    match cmd {
        DeployCmd::Status { script_id, json } => {
            let script_id = resolve_script_id(&app, script_id.as_deref())?;
            let status = app
                .deployments()
                .status(&script_id)
                .await
                .map_err(render_error)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
                return Ok(());
            }
            for slot in &status.slots {
                match &slot.deployment {
                    Some(d) => println!(
                        "{:<10} {} v{} {}",
                        format!("{:?}", slot.environment).to_lowercase(),
                        d.deployment_id,
                        d.version_number
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "HEAD".into()),
                        d.web_app_url.as_deref().unwrap_or("-")
                    ),
                    None => println!(
                        "{:<10} (missing)",
                        format!("{:?}", slot.environment).to_lowercase()
                    ),
                }
            }
            println!(
                "versions: {} total, {} prod-tagged, highest {}",
                status.total_versions,
                status.prod_version_count,
                status
                    .highest_version
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".into())
            );
            for warning in &status.warnings {
                println!("  {warning}");
            }
            Ok(())
        }
        DeployCmd::Reset { script_id } => {
            let script_id = resolve_script_id(&app, script_id.as_deref())?;
            let outcome = app
                .deployments()
                .reset(&script_id)
                .await
                .map_err(render_error)?;
            println!("reset: {}", outcome.status);
            for d in &outcome.deployments {
                println!("  {} {}", d.description, d.deployment_id);
            }
            for warning in &outcome.warnings {
                println!("  warning: {warning}");
            }
            if let Some(cw) = &outcome.config_warning {
                println!("  config warning: {cw}");
            }
            Ok(())
        }
        DeployCmd::Promote {
            to,
            description,
            script_id,
        } => {
            let script_id = resolve_script_id(&app, script_id.as_deref())?;
            let to = match to.as_str() {
                "staging" => EnvSlot::Staging,
                "prod" => EnvSlot::Prod,
                other => bail!("unknown promotion target {other}; expected staging or prod"),
            };
            let outcome = app
                .deployments()
                .promote(&script_id, to, description.as_deref())
                .await
                .map_err(render_error)?;
            println!(
                "promoted to {:?}: v{} on {}",
                outcome.to, outcome.version_number, outcome.deployment_id
            );
            Ok(())
        }
        DeployCmd::Rollback {
            to_version,
            script_id,
        } => {
            let script_id = resolve_script_id(&app, script_id.as_deref())?;
            let outcome = app
                .deployments()
                .rollback(&script_id, to_version)
                .await
                .map_err(render_error)?;
            println!(
                "rolled back prod from {} to v{}",
                outcome
                    .from_version
                    .map(|v| format!("v{v}"))
                    .unwrap_or_else(|| "HEAD".into()),
                outcome.to_version
            );
            Ok(())
        }
    }
}

async fn cmd_worktree(cmd: WorktreeCmd) -> Result<()> {
    let app = app()?;
    match cmd {
        WorktreeCmd::Add {
            name,
            parent,
            claim,
            no_suffix,
        } => {
            let parent = resolve_script_id(&app, parent.as_deref())?;
            let entry = app
                .worktrees()
                .map_err(render_error)?
                .add(WorktreeAddRequest {
                    parent_script_id: parent,
                    name,
                    unique_suffix: !no_suffix,
                    claim_by: claim,
                })
                .await
                .map_err(render_error)?;
            println!(
                "worktree {} on branch {} at {}",
                entry.script_id, entry.branch, entry.local_path
            );
            Ok(())
        }
        WorktreeCmd::List { json } => {
            let views = app
                .worktrees()
                .map_err(render_error)?
                .list()
                .map_err(render_error)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&views)?);
                return Ok(());
            }
            for view in &views {
                let state = if view.stale_claim {
                    "READY (stale claim)".to_string()
                } else {
                    format!("{:?}", view.entry.state).to_uppercase()
                };
                println!(
                    "{}  {}  {}  {}",
                    view.entry.script_id, view.entry.branch, state, view.entry.local_path
                );
            }
            Ok(())
        }
        WorktreeCmd::Claim { script_id, agent } => {
            app.worktrees()
                .map_err(render_error)?
                .claim(&script_id, &agent)
                .await
                .map_err(render_error)?;
            println!("claimed");
            Ok(())
        }
        WorktreeCmd::Release {
            script_id,
            agent,
            force,
        } => {
            app.worktrees()
                .map_err(render_error)?
                .release(&script_id, &agent, force)
                .await
                .map_err(render_error)?;
            println!("released");
            Ok(())
        }
        WorktreeCmd::Remove { script_id } => {
            let warnings = app
                .worktrees()
                .map_err(render_error)?
                .remove(&script_id)
                .await
                .map_err(render_error)?;
            println!("removed");
            for warning in warnings {
                println!("  warning: {warning}");
            }
            Ok(())
        }
    }
}

async fn cmd_config(cmd: ConfigCmd) -> Result<()> {
    let app = app()?;
    match cmd {
        ConfigCmd::Get { key } => {
            let cfg = app.config.load().map_err(render_error)?;
            match key.as_str() {
                "local_root" => println!(
                    "{}",
                    gascp::config::resolve_local_root(&cfg).display()
                ),
                "current_project" => {
                    println!("{}", cfg.current_project.as_deref().unwrap_or(""))
                }
                "oauth_client_id" => println!("{}", cfg.oauth.client_id),
                _ => bail!("Unknown key: {key}"),
            }
            Ok(())
        }
        ConfigCmd::Set { key, value } => {
            app.config
                .update("config set", move |cfg| {
                    match key.as_str() {
                        "local_root" => {
                            cfg.local_root.root_path = Some(value.clone());
                            cfg.local_root.last_updated =
                                Some(chrono::Utc::now().to_rfc3339());
                        }
                        "current_project" => cfg.current_project = Some(value.clone()),
                        "oauth_client_id" => cfg.oauth.client_id = value.clone(),
                        _ => return Err(Error::validation(format!("Unknown key: {key}"))),
                    }
                    Ok(())
                })
                .await
                .map_err(render_error)?;
            println!("ok");
            Ok(())
        }
    }
}

fn resolve_script_id(app: &App, script_id: Option<&str>) -> Result<String> {
    if let Some(id) = script_id {
        return Ok(id.to_string());
    }
    let cfg = app.config.load().map_err(render_error)?;
    cfg.current_script_id()
        .map(str::to_string)
        .context("no --script-id given and no current project set")
}
