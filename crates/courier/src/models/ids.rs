//! String identifiers used as natural keys
//!
//! Provider ids (thread, message, event) are opaque strings issued by Google;
//! user ids are whatever the embedding application uses to scope rows.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of the local user that owns mirrored rows
    UserId
);
string_id!(
    /// Provider thread id (Gmail thread id)
    ThreadId
);
string_id!(
    /// Provider message id (Gmail message id)
    MessageId
);
string_id!(
    /// Provider calendar event id
    EventId
);
