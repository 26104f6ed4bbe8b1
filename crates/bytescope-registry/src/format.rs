//! Registered format descriptions

use crate::Error;
use bytescope_schema::{Meta, Signature};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a format came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Shipped with the tool
    System,
    /// Added by the user
    User,
    /// Shared schema collections
    Community,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::System, Category::User, Category::Community];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::System => "system",
            Category::User => "user",
            Category::Community => "community",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Category::System),
            "user" => Ok(Category::User),
            "community" => Ok(Category::Community),
            _ => Err(Error::InvalidCategory(s.to_string())),
        }
    }
}

/// What the registry knows about a format without compiling it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatInfo {
    pub id: String,
    pub title: Option<String>,
    pub category: Category,
    /// Lowercase, without the leading dot
    pub extensions: Vec<String>,
    pub signature: Option<Signature>,
}

impl FormatInfo {
    /// Build from a schema's meta section
    pub fn from_meta(meta: &Meta, category: Category) -> Self {
        Self {
            id: meta.id.clone(),
            title: meta.title.clone(),
            category,
            extensions: meta.file_extensions.clone(),
            signature: meta.signature.clone(),
        }
    }

    /// Title if set, otherwise the id
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }

    /// Signature bytes as spaced hex (`89 50 4E 47`)
    pub fn signature_hex(&self) -> Option<String> {
        self.signature.as_ref().map(|sig| {
            sig.bytes
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
    }
}

/// Selection for [`crate::FormatRegistry::list`]
#[derive(Debug, Clone, Default)]
pub struct FormatFilter {
    pub category: Option<Category>,
    /// Case-insensitive substring of the id or title
    pub name: Option<String>,
}

impl FormatFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into().to_lowercase());
        self
    }

    pub fn matches(&self, info: &FormatInfo) -> bool {
        if self.category.is_some_and(|c| c != info.category) {
            return false;
        }
        match &self.name {
            Some(needle) => {
                info.id.to_lowercase().contains(needle)
                    || info
                        .title
                        .as_ref()
                        .is_some_and(|t| t.to_lowercase().contains(needle))
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str, title: Option<&str>, category: Category) -> FormatInfo {
        FormatInfo {
            id: id.to_string(),
            title: title.map(ToString::to_string),
            category,
            extensions: Vec::new(),
            signature: None,
        }
    }

    #[test]
    fn test_category_parse_and_display() {
        assert_eq!("User".parse::<Category>().unwrap(), Category::User);
        assert_eq!(Category::Community.to_string(), "community");
        assert!("vendor".parse::<Category>().is_err());
    }

    #[test]
    fn test_filter() {
        let png = info("png", Some("Portable Network Graphics"), Category::System);
        assert!(FormatFilter::new().matches(&png));
        assert!(FormatFilter::new().name("network").matches(&png));
        assert!(FormatFilter::new().name("PN").matches(&png));
        assert!(!FormatFilter::new().category(Category::User).matches(&png));
        assert!(!FormatFilter::new().name("zip").matches(&png));
    }

    #[test]
    fn test_display_name_and_signature_hex() {
        let mut gif = info("gif", None, Category::System);
        assert_eq!(gif.display_name(), "gif");
        gif.signature = Some(Signature {
            offset: 0,
            bytes: b"GIF8".to_vec(),
            mask: None,
        });
        assert_eq!(gif.signature_hex().as_deref(), Some("47 49 46 38"));
    }
}
