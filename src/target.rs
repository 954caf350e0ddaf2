//! Campaign target links.
//!
//! Bulk actions are aimed at a channel or group identified by an
//! `https://t.me/...` link. Public channels are addressed by name; private
//! groups by an invite hash (`/+<hash>`), which requires a different join
//! call on the network side, so the distinction is made once here.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetLink {
    /// Public channel or group addressed by its public name.
    Public { name: String },
    /// Private group addressed by an invite hash.
    Invite { hash: String },
}

impl TargetLink {
    /// Parse a campaign link. Query parameters (e.g. `?start=...`) are
    /// dropped before classification.
    pub fn parse(raw: &str) -> Result<Self, TargetLinkError> {
        let url = Url::parse(raw.trim()).map_err(|_| TargetLinkError::NotAUrl(raw.to_string()))?;

        if url.scheme() != "https" {
            return Err(TargetLinkError::WrongScheme(url.scheme().to_string()));
        }
        if url.host_str() != Some("t.me") {
            return Err(TargetLinkError::WrongHost(
                url.host_str().unwrap_or_default().to_string(),
            ));
        }

        let path = url.path().trim_matches('/');
        if path.is_empty() {
            return Err(TargetLinkError::EmptyPath);
        }

        if let Some(hash) = path.strip_prefix('+') {
            if hash.is_empty() {
                return Err(TargetLinkError::EmptyPath);
            }
            return Ok(Self::Invite {
                hash: hash.to_string(),
            });
        }

        if !path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(TargetLinkError::BadName(path.to_string()));
        }

        Ok(Self::Public {
            name: path.to_string(),
        })
    }
}

impl fmt::Display for TargetLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public { name } => write!(f, "https://t.me/{}", name),
            Self::Invite { hash } => write!(f, "https://t.me/+{}", hash),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetLinkError {
    NotAUrl(String),
    WrongScheme(String),
    WrongHost(String),
    EmptyPath,
    BadName(String),
}

impl fmt::Display for TargetLinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAUrl(raw) => write!(f, "not a URL: {}", raw),
            Self::WrongScheme(s) => write!(f, "expected https link, got {}", s),
            Self::WrongHost(h) => write!(f, "expected a t.me link, got host {}", h),
            Self::EmptyPath => write!(f, "link has no channel name or invite hash"),
            Self::BadName(n) => write!(f, "invalid channel name: {}", n),
        }
    }
}

impl std::error::Error for TargetLinkError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_public_links() {
        let link = TargetLink::parse("https://t.me/example_channel").unwrap();
        assert_eq!(
            link,
            TargetLink::Public {
                name: "example_channel".to_string()
            }
        );
    }

    #[test]
    fn parses_invite_links() {
        let link = TargetLink::parse("https://t.me/+AbCdEf123").unwrap();
        assert_eq!(
            link,
            TargetLink::Invite {
                hash: "AbCdEf123".to_string()
            }
        );
    }

    #[test]
    fn strips_query_parameters() {
        let link = TargetLink::parse("https://t.me/example_channel?start=promo").unwrap();
        assert_eq!(
            link,
            TargetLink::Public {
                name: "example_channel".to_string()
            }
        );
    }

    #[test]
    fn rejects_other_hosts_and_schemes() {
        assert!(matches!(
            TargetLink::parse("https://example.com/chan"),
            Err(TargetLinkError::WrongHost(_))
        ));
        assert!(matches!(
            TargetLink::parse("http://t.me/chan"),
            Err(TargetLinkError::WrongScheme(_))
        ));
        assert!(TargetLink::parse("not a link").is_err());
        assert!(matches!(
            TargetLink::parse("https://t.me/"),
            Err(TargetLinkError::EmptyPath)
        ));
    }
}
