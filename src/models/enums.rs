use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
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

str_enum!(RunStatus {
    Processing => "processing",
    Ready => "ready",
    ReviewNeeded => "review_needed",
    Error => "error",
});

str_enum!(DocumentKind {
    Paged => "paged",
    Tabular => "tabular",
});

/// Overall verdict of the quality-assurance audit.
///
/// Wire format is uppercase (`"PASS"` / `"FAIL"` / `"REVIEW"`), which is what
/// audit backends return; stored in the database via [`AuditStatus::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditStatus {
    Pass,
    Fail,
    Review,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Review => "REVIEW",
        }
    }
}

impl std::str::FromStr for AuditStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASS" => Ok(Self::Pass),
            "FAIL" => Ok(Self::Fail),
            "REVIEW" => Ok(Self::Review),
            _ => Err(DatabaseError::InvalidEnum {
                field: "AuditStatus".into(),
                value: s.into(),
            }),
        }
    }
}
