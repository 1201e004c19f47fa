use crate::agent::AgentConfig;
use crate::tools::{duckduckgo, yfinance};

pub fn config() -> AgentConfig {
    AgentConfig {
        agent_id: "yfinance_agent".into(),
        name: "YFinance Agent".into(),
        description: include_str!("../../prompts/yfinance_agent/description.md").into(),
        instructions: include_str!("../../prompts/yfinance_agent/instructions.md").into(),
        toolsets: vec![
            duckduckgo::CONFIG.tool_id.into(),
            yfinance::CONFIG.tool_id.into(),
        ],
        ..Default::default()
    }
}
