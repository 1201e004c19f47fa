//! Built-in teams.

mod hn_team;

use crate::registry::TeamRegistration;
use crate::team::build_team;

pub fn builtin() -> Vec<TeamRegistration> {
    vec![TeamRegistration::new(hn_team::config(), build_team)]
}
