//! Hierarchical room identifiers
//!
//! An HRRI tags where a frame comes from and which consumer an endpoint
//! belongs to:
//! ```text
//! LOCATION-GROUP-OBJECT[-VARIANT]
//! MUC-VIS-UNITY
//! ESS-TRACK-HAND-LEFT
//! ```
//!
//! The location token `*` is a wildcard meaning "this room, whichever it is".

use std::fmt;
use std::sync::OnceLock;

/// Wildcard location token
pub const WILDCARD_LOCATION: &str = "*";

fn origin_pattern() -> &'static regex_lite::Regex {
    static PATTERN: OnceLock<regex_lite::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex_lite::Regex::new(r"^[A-Z0-9]+(-[A-Z0-9]+){2,}$")
            .expect("static HRRI pattern compiles")
    })
}

/// A parsed hierarchical room identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Hrri {
    location: String,
    group: String,
    object: String,
    variant: Option<String>,
}

impl Hrri {
    /// Parse an identifier leniently.
    ///
    /// Missing tokens become empty strings; this never fails. Use
    /// [`Hrri::is_well_formed`] to validate untrusted names first.
    pub fn parse(s: &str) -> Self {
        let mut tokens = s.split('-');
        let mut next = || tokens.next().unwrap_or_default().to_string();

        let location = next();
        let group = next();
        let object = next();
        let variant = s.splitn(4, '-').nth(3).map(|v| v.to_string());

        Self {
            location,
            group,
            object,
            variant,
        }
    }

    /// Build an identifier from its tokens
    pub fn new(location: &str, group: &str, object: &str) -> Self {
        Self {
            location: location.to_string(),
            group: group.to_string(),
            object: object.to_string(),
            variant: None,
        }
    }

    /// Attach a variant token
    pub fn with_variant(mut self, variant: &str) -> Self {
        self.variant = Some(variant.to_string());
        self
    }

    /// Check whether a name is a well-formed origin identifier
    /// (3 or more uppercase alphanumeric tokens)
    pub fn is_well_formed(s: &str) -> bool {
        origin_pattern().is_match(s)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    /// True when the location is the `*` wildcard
    pub fn is_wildcard(&self) -> bool {
        self.location == WILDCARD_LOCATION
    }

    /// True when this identifier originates in the room named `location`
    pub fn is_local_to(&self, location: &str) -> bool {
        self.is_wildcard() || self.location == location
    }
}

impl fmt::Display for Hrri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.location, self.group, self.object)?;
        if let Some(variant) = &self.variant {
            write!(f, "-{}", variant)?;
        }
        Ok(())
    }
}

impl From<&str> for Hrri {
    fn from(s: &str) -> Self {
        Hrri::parse(s)
    }
}

impl From<String> for Hrri {
    fn from(s: String) -> Self {
        Hrri::parse(&s)
    }
}
