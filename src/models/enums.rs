use std::fmt;

use serde::{Deserialize, Serialize};

use crate::db::DatabaseError;

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// The literal doubles as the serde name, so wire and column values agree.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(MessageRole {
    User => "user",
    Assistant => "assistant",
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn message_role_round_trip() {
        for (variant, s) in [
            (MessageRole::User, "user"),
            (MessageRole::Assistant, "assistant"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(MessageRole::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn message_role_serde_uses_lowercase() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let role: MessageRole = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, MessageRole::User);
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(MessageRole::from_str("system").is_err());
        assert!(MessageRole::from_str("").is_err());
        assert!(serde_json::from_str::<MessageRole>("\"moderator\"").is_err());
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(MessageRole::User.to_string(), "user");
    }
}
