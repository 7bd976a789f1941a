//! String-backed entity identifiers.
//!
//! Legacy exports carry uuid-shaped string ids; the new schema keeps them as
//! opaque strings so migrated rows preserve their original identity.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a conversation topic.
    TopicId
);
string_id!(
    /// Identifier of a message within a topic.
    MessageId
);
string_id!(
    /// Identifier of a content block.
    BlockId
);
string_id!(
    /// Identifier of an assistant profile.
    AssistantId
);

#[cfg(test)]
mod tests {
    use super::MessageId;

    #[test]
    fn serializes_transparently() {
        let id = MessageId::new("m42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"m42\"");
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
