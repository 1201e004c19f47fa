use crate::team::{TeamConfig, TeamMode};

pub fn config() -> TeamConfig {
    TeamConfig {
        team_id: "hn_team".into(),
        name: "HackerNews Team".into(),
        description: include_str!("../../prompts/hn_team/description.md").trim().into(),
        instructions: include_str!("../../prompts/hn_team/instructions.md")
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect(),
        mode: TeamMode::Coordinate,
        members: vec!["hacker_news_agent".into(), "web_agent".into()],
        ..Default::default()
    }
}
