use vision_core::SessionResolver;
use vision_mcp_runtime::McpServer;

#[derive(Clone)]
pub struct AppState {
    pub mcp: McpServer,
}

impl AppState {
    pub fn new(mcp: McpServer) -> Self {
        Self { mcp }
    }

    pub fn resolver(&self) -> &SessionResolver {
        self.mcp.resolver()
    }
}
