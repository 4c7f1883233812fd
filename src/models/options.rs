//! What a collection run is allowed to do, and to which stores.

use crate::Error;
use std::fmt;
use std::str::FromStr;

/// Which stores a run collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssetType {
    /// Object storage only.
    S3,
    /// Image repository only.
    Ecr,
    /// Both stores.
    #[default]
    All,
}

impl AssetType {
    /// Returns the string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Ecr => "ecr",
            Self::All => "all",
        }
    }

    /// Returns `true` if object storage is collected.
    #[must_use]
    pub const fn collects_objects(self) -> bool {
        matches!(self, Self::S3 | Self::All)
    }

    /// Returns `true` if the image repository is collected.
    #[must_use]
    pub const fn collects_images(self) -> bool {
        matches!(self, Self::Ecr | Self::All)
    }
}

impl FromStr for AssetType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "ecr" => Ok(Self::Ecr),
            "all" => Ok(Self::All),
            other => Err(Error::InvalidInput(format!(
                "unknown asset type '{other}' (expected s3, ecr or all)"
            ))),
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a run may do with what it finds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    /// Report only.
    Print,
    /// Tag and untag, never delete.
    Tag,
    /// Delete, never tag.
    DeleteTagged,
    /// Tag, untag and delete.
    #[default]
    Full,
}

impl Action {
    /// Returns the string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Tag => "tag",
            Self::DeleteTagged => "delete-tagged",
            Self::Full => "full",
        }
    }

    /// Returns `true` if the action permits deletion.
    #[must_use]
    pub const fn can_delete(self) -> bool {
        matches!(self, Self::DeleteTagged | Self::Full)
    }

    /// Returns `true` if the action permits tagging and untagging.
    #[must_use]
    pub const fn can_tag(self) -> bool {
        matches!(self, Self::Tag | Self::Full)
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "print" => Ok(Self::Print),
            "tag" => Ok(Self::Tag),
            "delete-tagged" | "delete_tagged" => Ok(Self::DeleteTagged),
            "full" => Ok(Self::Full),
            other => Err(Error::InvalidInput(format!(
                "unknown action '{other}' (expected print, tag, delete-tagged or full)"
            ))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the two backing stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// Bootstrap bucket (file assets).
    Objects,
    /// Bootstrap repository (image assets).
    Images,
}

impl StoreKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Objects => "s3",
            Self::Images => "ecr",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Action::Print, false, false)]
    #[test_case(Action::Tag, false, true)]
    #[test_case(Action::DeleteTagged, true, false)]
    #[test_case(Action::Full, true, true)]
    fn test_action_permissions(action: Action, delete: bool, tag: bool) {
        assert_eq!(action.can_delete(), delete);
        assert_eq!(action.can_tag(), tag);
    }

    #[test]
    fn test_parse_action() {
        assert_eq!("DELETE-TAGGED".parse::<Action>().ok(), Some(Action::DeleteTagged));
        assert_eq!(" full ".parse::<Action>().ok(), Some(Action::Full));
        assert!("purge".parse::<Action>().is_err());
    }

    #[test]
    fn test_parse_asset_type() {
        let all: AssetType = "all".parse().unwrap_or(AssetType::S3);
        assert!(all.collects_objects() && all.collects_images());

        let ecr: AssetType = "ecr".parse().unwrap_or(AssetType::All);
        assert!(!ecr.collects_objects() && ecr.collects_images());

        assert!("gcs".parse::<AssetType>().is_err());
    }
}
