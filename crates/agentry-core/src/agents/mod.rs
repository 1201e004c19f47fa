//! Built-in agent personas.

mod agno_assist;
mod hackernews;
mod web;
mod yfinance;

use crate::agent::build_agent;
use crate::registry::AgentRegistration;

/// Static registration table, in listing order.
pub fn builtin() -> Vec<AgentRegistration> {
    vec![
        AgentRegistration::new(hackernews::config(), build_agent),
        AgentRegistration::new(web::config(), build_agent),
        AgentRegistration::new(yfinance::config(), build_agent),
        AgentRegistration::new(agno_assist::config(), build_agent),
    ]
}
