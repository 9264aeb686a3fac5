// Terminal metadata entity
// Opaque side table joined only at alert-rendering time

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalInfo {
    pub entity_id: String,
    pub location: String,
    pub category: String,
}
