use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters, ServerHandler},
    model::{
        CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    service::ServiceExt,
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::runtime::Builder as TokioRuntimeBuilder;

use crate::app::App;
use crate::deploy::EnvSlot;
use crate::error::Error;
use crate::pathspec::FileKind;
use crate::worktree::WorktreeAddRequest;
use crate::writeflow::WriteRequest;

const SERVER_INSTRUCTIONS: &str = "Use file_cat to read (it reports the hash to pass back as \
expectedHash), file_write to mutate, and file_status when a write is rejected. Deployment and \
worktree tools operate on the current project unless a scriptId is given.";

pub fn run_server() -> anyhow::Result<()> {
    let runtime = TokioRuntimeBuilder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let app = Arc::new(App::from_env()?);
        serve_stdio(GascpServer::new(app)).await
    })
}

async fn serve_stdio(server: GascpServer) -> anyhow::Result<()> {
    let running = server.serve(stdio()).await?;
    running.waiting().await?;
    Ok(())
}

#[derive(Clone)]
struct GascpServer {
    app: Arc<App>,
    tool_router: ToolRouter<Self>,
}

impl GascpServer {
    fn new(app: Arc<App>) -> Self {
        Self {
            app,
            tool_router: Self::tool_router(),
        }
    }

    fn script_id_or_current(&self, script_id: Option<&str>) -> Result<String, McpError> {
        if let Some(id) = script_id {
            return Ok(id.to_string());
        }
        let cfg = self.app.config.load().map_err(to_mcp_error)?;
        cfg.current_script_id()
            .map(str::to_string)
            .ok_or_else(|| {
                McpError::invalid_params("no scriptId given and no current project set", None)
            })
    }
}

fn make_tool_result(text: String, structured: Value) -> CallToolResult {
    CallToolResult {
        content: vec![Content::text(text)],
        structured_content: Some(structured),
        is_error: Some(false),
        meta: None,
    }
}

/// Map the core taxonomy onto MCP error envelopes; the structured failure
/// object rides along as data.
fn to_mcp_error(err: Error) -> McpError {
    let envelope = err.envelope();
    match &err {
        Error::Validation(_) => McpError::invalid_params(err.to_string(), Some(envelope)),
        _ => McpError::internal_error(err.to_string(), Some(envelope)),
    }
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct CatArgs {
    /// `<scriptId>/<filename>` or `<filename>` against the current project.
    path: String,
    /// Read the local mirror when present instead of fetching.
    prefer_local: Option<bool>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct WriteArgs {
    path: String,
    /// Unwrapped, edit-time content.
    content: String,
    /// SERVER_JS, HTML, or JSON; inferred from the path extension if absent.
    file_type: Option<String>,
    /// Baseline hash from a previous read; omit for first writes.
    expected_hash: Option<String>,
    force: Option<bool>,
    allow_new_local: Option<bool>,
    /// Target position within the project's ordered file list.
    position: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct PathArgs {
    path: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ScriptIdArgs {
    script_id: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct CacheClearArgs {
    script_id: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ProjectInitArgs {
    script_id: String,
    /// Catalog name; defaults to the remote title.
    name: Option<String>,
    /// Repair drifted helper files instead of only warning.
    force: Option<bool>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ProjectCreateArgs {
    title: String,
    name: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ProjectUseArgs {
    name: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct PromoteArgs {
    script_id: Option<String>,
    /// "staging" or "prod".
    to: String,
    /// Required when promoting to staging.
    description: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct RollbackArgs {
    script_id: Option<String>,
    to_version: Option<u32>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct WorktreeAddArgs {
    parent_script_id: Option<String>,
    /// Branch slug; sanitized under the wt/ prefix.
    name: Option<String>,
    unique_suffix: Option<bool>,
    claim_by: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct WorktreeClaimArgs {
    script_id: String,
    agent: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct WorktreeReleaseArgs {
    script_id: String,
    agent: String,
    force: Option<bool>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct WorktreeRemoveArgs {
    script_id: String,
}

fn parse_kind(file_type: Option<&str>, path: &str) -> Result<FileKind, McpError> {
    if let Some(raw) = file_type {
        return match raw {
            "SERVER_JS" => Ok(FileKind::ServerJs),
            "HTML" => Ok(FileKind::Html),
            "JSON" => Ok(FileKind::Json),
            other => Err(McpError::invalid_params(
                format!("unknown fileType {other}; expected SERVER_JS, HTML, or JSON"),
                None,
            )),
        };
    }
    if crate::pathspec::is_manifest(path) {
        return Ok(FileKind::Json);
    }
    let kind = path
        .rsplit_once('.')
        .and_then(|(_, ext)| FileKind::from_extension(ext))
        .unwrap_or(FileKind::ServerJs);
    Ok(kind)
}

#[tool_router]
impl GascpServer {
    #[tool(
        name = "auth_status",
        description = "Report whether a session access token is available"
    )]
    async fn route_auth_status(&self) -> Result<CallToolResult, McpError> {
        let status = self.app.auth_status();
        let text = if status.authenticated {
            "Authenticated for this session".to_string()
        } else {
            "Not authenticated; export GASCP_ACCESS_TOKEN to supply a session token".to_string()
        };
        Ok(make_tool_result(text, json!({ "auth": status })))
    }

    #[tool(
        name = "project_list",
        description = "List projects registered in the local catalog"
    )]
    async fn route_project_list(&self) -> Result<CallToolResult, McpError> {
        let cfg = self.app.config.load().map_err(to_mcp_error)?;
        let rows: Vec<Value> = cfg
            .projects
            .iter()
            .map(|(name, entry)| {
                json!({
                    "name": name,
                    "scriptId": entry.script_id,
                    "lastSync": entry.last_sync,
                    "current": cfg.current_project.as_deref() == Some(name.as_str()),
                })
            })
            .collect();
        Ok(make_tool_result(
            format!(
                "{} project{} registered",
                rows.len(),
                if rows.len() == 1 { "" } else { "s" }
            ),
            json!({ "projects": rows }),
        ))
    }

    #[tool(name = "project_use", description = "Switch the current project")]
    async fn route_project_use(
        &self,
        Parameters(args): Parameters<ProjectUseArgs>,
    ) -> Result<CallToolResult, McpError> {
        let name = args.name.clone();
        self.app
            .config
            .update("project use", move |cfg| {
                if !cfg.projects.contains_key(&name) {
                    return Err(Error::validation(format!("unknown project: {name}")));
                }
                cfg.current_project = Some(name.clone());
                Ok(())
            })
            .await
            .map_err(to_mcp_error)?;
        Ok(make_tool_result(
            format!("Current project is now {}", args.name),
            json!({ "currentProject": args.name }),
        ))
    }

    #[tool(
        name = "project_init",
        description = "Mirror a remote project locally, seed its git repo, and verify injected helpers"
    )]
    async fn route_project_init(
        &self,
        Parameters(args): Parameters<ProjectInitArgs>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .app
            .project_init(
                &args.script_id,
                args.name.as_deref(),
                args.force.unwrap_or(false),
            )
            .await
            .map_err(to_mcp_error)?;
        let text = if result.verification_warnings.is_empty() {
            format!("Initialized {} ({} files)", result.name, result.files)
        } else {
            format!(
                "Initialized {} ({} files) with {} helper warning(s); re-run with force=true to repair",
                result.name,
                result.files,
                result.verification_warnings.len()
            )
        };
        Ok(make_tool_result(text, json!({ "init": result })))
    }

    #[tool(
        name = "project_create",
        description = "Create a new remote project with verified helper files and mirror it"
    )]
    async fn route_project_create(
        &self,
        Parameters(args): Parameters<ProjectCreateArgs>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .app
            .project_create(&args.title, args.name.as_deref())
            .await
            .map_err(to_mcp_error)?;
        Ok(make_tool_result(
            format!("Created {} as {}", result.script_id, result.name),
            json!({ "init": result }),
        ))
    }

    #[tool(
        name = "file_cat",
        description = "Read a file (unwrapped for editing); reports the hash to use as expectedHash"
    )]
    async fn route_file_cat(
        &self,
        Parameters(args): Parameters<CatArgs>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .app
            .cat(&args.path, args.prefer_local.unwrap_or(true))
            .await
            .map_err(to_mcp_error)?;
        Ok(make_tool_result(
            format!(
                "{}/{} ({} bytes, {} copy)",
                result.script_id,
                result.filename,
                result.content.len(),
                result.source
            ),
            json!({ "file": result }),
        ))
    }

    #[tool(
        name = "file_write",
        description = "Write a file through the atomic pipeline: sync gate, conflict check, git hooks, remote push"
    )]
    async fn route_file_write(
        &self,
        Parameters(args): Parameters<WriteArgs>,
    ) -> Result<CallToolResult, McpError> {
        let cfg = self.app.config.load().map_err(to_mcp_error)?;
        let resolved = crate::pathspec::resolve(&args.path, cfg.current_script_id())
            .map_err(to_mcp_error)?;
        let kind = parse_kind(args.file_type.as_deref(), &args.path)?;
        let pipeline = self.app.pipeline().map_err(to_mcp_error)?;
        let outcome = pipeline
            .execute(WriteRequest {
                script_id: resolved.script_id,
                filename: resolved.file_path,
                kind,
                content: args.content,
                expected_hash: args.expected_hash,
                force: args.force.unwrap_or(false),
                allow_new_local: args.allow_new_local.unwrap_or(false),
                skip_sync_check: false,
                position: args.position,
            })
            .await
            .map_err(to_mcp_error)?;
        Ok(make_tool_result(
            format!(
                "Wrote {}/{} (position {} of {}); {}",
                outcome.script_id,
                outcome.filename,
                outcome.position,
                outcome.total_files,
                outcome.next
            ),
            json!({ "write": outcome }),
        ))
    }

    #[tool(
        name = "file_status",
        description = "Compare local, cached, and remote hashes for one file"
    )]
    async fn route_file_status(
        &self,
        Parameters(args): Parameters<PathArgs>,
    ) -> Result<CallToolResult, McpError> {
        let status = self
            .app
            .file_status(&args.path)
            .await
            .map_err(to_mcp_error)?;
        let text = if status.in_sync {
            format!("{}/{} is in sync", status.script_id, status.filename)
        } else {
            format!("{}/{} is OUT OF SYNC", status.script_id, status.filename)
        };
        Ok(make_tool_result(text, json!({ "status": status })))
    }

    #[tool(
        name = "cache_clear",
        description = "Drop the per-file metadata cache for a project mirror"
    )]
    async fn route_cache_clear(
        &self,
        Parameters(args): Parameters<CacheClearArgs>,
    ) -> Result<CallToolResult, McpError> {
        let cleared = self
            .app
            .cache_clear(&args.script_id)
            .await
            .map_err(to_mcp_error)?;
        Ok(make_tool_result(
            format!("Cleared cached metadata on {cleared} file(s)"),
            json!({ "cleared": cleared }),
        ))
    }

    #[tool(
        name = "deploy_status",
        description = "Show the dev/staging/prod deployments and version budget"
    )]
    async fn route_deploy_status(
        &self,
        Parameters(args): Parameters<ScriptIdArgs>,
    ) -> Result<CallToolResult, McpError> {
        let script_id = self.script_id_or_current(args.script_id.as_deref())?;
        let status = self
            .app
            .deployments()
            .status(&script_id)
            .await
            .map_err(to_mcp_error)?;
        Ok(make_tool_result(
            format!(
                "{} versions ({} prod-tagged); {} warning(s)",
                status.total_versions,
                status.prod_version_count,
                status.warnings.len()
            ),
            json!({ "deploy": status }),
        ))
    }

    #[tool(
        name = "deploy_reset",
        description = "Transactionally recreate the [DEV]/[STAGING]/[PROD] deployments"
    )]
    async fn route_deploy_reset(
        &self,
        Parameters(args): Parameters<ScriptIdArgs>,
    ) -> Result<CallToolResult, McpError> {
        let script_id = self.script_id_or_current(args.script_id.as_deref())?;
        let outcome = self
            .app
            .deployments()
            .reset(&script_id)
            .await
            .map_err(to_mcp_error)?;
        Ok(make_tool_result(
            format!("Deployment reset finished: {}", outcome.status),
            json!({ "reset": outcome }),
        ))
    }

    #[tool(
        name = "deploy_promote",
        description = "Promote dev→staging (versioned snapshot) or staging→prod (pointer move)"
    )]
    async fn route_deploy_promote(
        &self,
        Parameters(args): Parameters<PromoteArgs>,
    ) -> Result<CallToolResult, McpError> {
        let script_id = self.script_id_or_current(args.script_id.as_deref())?;
        let to = match args.to.as_str() {
            "staging" => EnvSlot::Staging,
            "prod" => EnvSlot::Prod,
            other => {
                return Err(McpError::invalid_params(
                    format!("unknown promotion target {other}; expected staging or prod"),
                    None,
                ))
            }
        };
        let outcome = self
            .app
            .deployments()
            .promote(&script_id, to, args.description.as_deref())
            .await
            .map_err(to_mcp_error)?;
        Ok(make_tool_result(
            format!(
                "Promoted to {:?}: version {} on deployment {}",
                outcome.to, outcome.version_number, outcome.deployment_id
            ),
            json!({ "promote": outcome }),
        ))
    }

    #[tool(
        name = "deploy_rollback",
        description = "Roll the [PROD] deployment back to a previous version"
    )]
    async fn route_deploy_rollback(
        &self,
        Parameters(args): Parameters<RollbackArgs>,
    ) -> Result<CallToolResult, McpError> {
        let script_id = self.script_id_or_current(args.script_id.as_deref())?;
        let outcome = self
            .app
            .deployments()
            .rollback(&script_id, args.to_version)
            .await
            .map_err(to_mcp_error)?;
        Ok(make_tool_result(
            format!("Rolled prod back to v{}", outcome.to_version),
            json!({ "rollback": outcome }),
        ))
    }

    #[tool(
        name = "worktree_add",
        description = "Create a parallel-development worktree: a cloned remote project on a new git branch"
    )]
    async fn route_worktree_add(
        &self,
        Parameters(args): Parameters<WorktreeAddArgs>,
    ) -> Result<CallToolResult, McpError> {
        let parent = self.script_id_or_current(args.parent_script_id.as_deref())?;
        let manager = self.app.worktrees().map_err(to_mcp_error)?;
        let entry = manager
            .add(WorktreeAddRequest {
                parent_script_id: parent,
                name: args.name,
                unique_suffix: args.unique_suffix.unwrap_or(true),
                claim_by: args.claim_by,
            })
            .await
            .map_err(to_mcp_error)?;
        Ok(make_tool_result(
            format!(
                "Worktree ready: {} on branch {} at {}",
                entry.script_id, entry.branch, entry.local_path
            ),
            json!({ "worktree": entry }),
        ))
    }

    #[tool(name = "worktree_list", description = "List registered worktrees")]
    async fn route_worktree_list(&self) -> Result<CallToolResult, McpError> {
        let manager = self.app.worktrees().map_err(to_mcp_error)?;
        let views = manager.list().map_err(to_mcp_error)?;
        Ok(make_tool_result(
            format!(
                "{} worktree{}",
                views.len(),
                if views.len() == 1 { "" } else { "s" }
            ),
            json!({ "worktrees": views }),
        ))
    }

    #[tool(name = "worktree_claim", description = "Claim a READY worktree for an agent")]
    async fn route_worktree_claim(
        &self,
        Parameters(args): Parameters<WorktreeClaimArgs>,
    ) -> Result<CallToolResult, McpError> {
        let manager = self.app.worktrees().map_err(to_mcp_error)?;
        let entry = manager
            .claim(&args.script_id, &args.agent)
            .await
            .map_err(to_mcp_error)?;
        Ok(make_tool_result(
            format!("Claimed {} for {}", entry.script_id, args.agent),
            json!({ "worktree": entry }),
        ))
    }

    #[tool(name = "worktree_release", description = "Release a claimed worktree")]
    async fn route_worktree_release(
        &self,
        Parameters(args): Parameters<WorktreeReleaseArgs>,
    ) -> Result<CallToolResult, McpError> {
        let manager = self.app.worktrees().map_err(to_mcp_error)?;
        let entry = manager
            .release(&args.script_id, &args.agent, args.force.unwrap_or(false))
            .await
            .map_err(to_mcp_error)?;
        Ok(make_tool_result(
            format!("Released {}", entry.script_id),
            json!({ "worktree": entry }),
        ))
    }

    #[tool(
        name = "worktree_remove",
        description = "Abandon a worktree: remove the git worktree and trash the backing project"
    )]
    async fn route_worktree_remove(
        &self,
        Parameters(args): Parameters<WorktreeRemoveArgs>,
    ) -> Result<CallToolResult, McpError> {
        let manager = self.app.worktrees().map_err(to_mcp_error)?;
        let warnings = manager
            .remove(&args.script_id)
            .await
            .map_err(to_mcp_error)?;
        let text = if warnings.is_empty() {
            format!("Removed worktree {}", args.script_id)
        } else {
            format!(
                "Removed worktree {} with {} warning(s)",
                args.script_id,
                warnings.len()
            )
        };
        Ok(make_tool_result(text, json!({ "warnings": warnings })))
    }
}

#[tool_handler]
impl ServerHandler for GascpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "gascp".into(),
                title: Some("gascp".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(SERVER_INSTRUCTIONS.to_string()),
        }
    }
}
