//! MCP tool surface: `find_code` is the only tool exposed to agents
//! (spec.md §6 "Agent-facing operation").

use std::sync::Arc;

use codeweaver_protocol::FindCodeRequest;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};

use crate::state::BackgroundState;

#[derive(Clone)]
pub struct CodeWeaverService {
    state: Arc<BackgroundState>,
    tool_router: ToolRouter<Self>,
}

impl CodeWeaverService {
    pub fn new(state: Arc<BackgroundState>) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_handler]
impl ServerHandler for CodeWeaverService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "CodeWeaver provides semantic code search for AI agents. Call find_code with a \
                 natural-language query to retrieve ranked code spans from the indexed project."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            ..Default::default()
        }
    }
}

#[tool_router]
impl CodeWeaverService {
    #[tool(
        description = "Search the indexed project for code matching a natural-language query. \
                        Returns ranked code spans with file path, line span, language, and a \
                        content snippet, assembled within a token budget."
    )]
    pub async fn find_code(
        &self,
        Parameters(request): Parameters<FindCodeRequest>,
    ) -> Result<CallToolResult, McpError> {
        let response = self.state.find_code(&request).await;
        let body = serde_json::to_string_pretty(&response).unwrap_or_default();
        Ok(CallToolResult::success(vec![Content::text(body)]))
    }
}
