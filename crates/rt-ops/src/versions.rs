use std::fmt;
use std::str::FromStr;

use semver::Version;

/// Parse a release tag or VERSION file body.
///
/// Leading `v`/`V` is stripped and a missing minor or patch component is
/// padded with zeros, so `v2.1` reads as `2.1.0`.
pub fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let bare = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    let split = bare.find(['-', '+']).unwrap_or(bare.len());
    let (core, suffix) = bare.split_at(split);
    let parts = core.split('.').count();
    if core.is_empty() || parts > 3 {
        return None;
    }
    let padded = format!("{core}{}{suffix}", ".0".repeat(3 - parts));
    Version::parse(&padded).ok()
}

/// Which release an update should install.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TargetVersion {
    /// Newest release in the registry, only if newer than the installed one.
    #[default]
    Latest,
    /// A specific release, applied even when it is not newer.
    Exact(Version),
}

impl FromStr for TargetVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("latest") {
            return Ok(TargetVersion::Latest);
        }
        parse_version(s)
            .map(TargetVersion::Exact)
            .ok_or_else(|| format!("invalid version `{s}`"))
    }
}

impl fmt::Display for TargetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetVersion::Latest => f.write_str("latest"),
            TargetVersion::Exact(v) => write!(f, "{v}"),
        }
    }
}
