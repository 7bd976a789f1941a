//! Domain migrators, in engine order: preferences, assistants, knowledge,
//! chat.

mod assistants;
mod chat;
mod knowledge;
mod preferences;

pub use assistants::{AssistantsMigrator, TOPIC_ASSISTANT_MAP_KEY, TOPIC_META_MAP_KEY};
pub use chat::ChatMigrator;
pub use knowledge::KnowledgeMigrator;
pub use preferences::PreferencesMigrator;

use crate::migrator::Migrator;

/// The full migrator set a production run registers.
#[must_use]
pub fn default_migrators() -> Vec<Box<dyn Migrator>> {
    vec![
        Box::new(PreferencesMigrator::new()),
        Box::new(AssistantsMigrator::new()),
        Box::new(KnowledgeMigrator::new()),
        Box::new(ChatMigrator::new()),
    ]
}
