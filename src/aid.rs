//! Actor identifier parsing and bare-equality.

use std::fmt;

use crate::error::MeshError;

/// An actor identifier, `bare[/resource]`.
///
/// `bare` names a logical role (`"pong"`); `resource` disambiguates a
/// specific instance of that role (`"pong/3f9c2e"`). Two AIDs are
/// "bare-equal" when their `bare` parts match regardless of resource.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Aid {
    bare: String,
    resource: Option<String>,
}

impl Aid {
    /// Parses and validates `s`. `bare` must be non-empty; if a `/`
    /// separator is present, the `resource` suffix must be non-empty too.
    pub fn parse(s: &str) -> Result<Self, MeshError> {
        match s.split_once('/') {
            None => {
                if s.is_empty() {
                    return Err(MeshError::InvalidAid(s.to_owned()));
                }
                Ok(Self {
                    bare: s.to_owned(),
                    resource: None,
                })
            }
            Some((bare, resource)) => {
                if bare.is_empty() || resource.is_empty() {
                    return Err(MeshError::InvalidAid(s.to_owned()));
                }
                Ok(Self {
                    bare: bare.to_owned(),
                    resource: Some(resource.to_owned()),
                })
            }
        }
    }

    /// Builds a fully-qualified AID from a bare id and a fresh resource.
    pub fn with_fresh_resource(bare: &str) -> Result<Self, MeshError> {
        if bare.is_empty() {
            return Err(MeshError::InvalidAid(bare.to_owned()));
        }
        Ok(Self {
            bare: bare.to_owned(),
            resource: Some(uuid::Uuid::new_v4().simple().to_string()),
        })
    }

    /// True if this AID carries no resource suffix.
    pub fn is_bare(&self) -> bool {
        self.resource.is_none()
    }

    pub fn bare(&self) -> &str {
        &self.bare
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Bare-equality: ignores the resource suffix.
    pub fn bare_eq(&self, other: &Aid) -> bool {
        self.bare == other.bare
    }
}

impl fmt::Display for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(r) => write!(f, "{}/{}", self.bare, r),
            None => write!(f, "{}", self.bare),
        }
    }
}

impl std::str::FromStr for Aid {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Aid::parse(s)
    }
}
