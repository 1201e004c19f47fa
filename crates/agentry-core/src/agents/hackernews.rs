use crate::agent::AgentConfig;
use crate::tools::hackernews;

pub fn config() -> AgentConfig {
    AgentConfig {
        agent_id: "hacker_news_agent".into(),
        name: "HackerNews Researcher".into(),
        description: include_str!("../../prompts/hacker_news_agent/description.md").into(),
        instructions: include_str!("../../prompts/hacker_news_agent/instructions.md").into(),
        toolsets: vec![hackernews::CONFIG.tool_id.into()],
        delete_memories: true,
        clear_memories: true,
        ..Default::default()
    }
}
