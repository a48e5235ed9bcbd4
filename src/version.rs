use regex::Regex;
use std::fmt;
use thiserror::Error;

/// Build and Revision are stored as 16-bit parts; everything is reduced modulo this.
pub const PART_MODULUS: u64 = 1 << 16;

/// Stands in for the Revision in the stored `ApplicationVersion`.
pub const REVISION_WILDCARD: &str = "*";

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("Could not extract Major.Minor.Build from version string: '{0}'")]
    MalformedVersion(String),
    #[error("No ApplicationRevision found to derive the revision from")]
    MissingRevision,
    #[error("ApplicationRevision is not an unsigned integer: '{0}'")]
    InvalidRevisionFormat(String),
    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClickOnceVersion {
    pub major: u64,
    pub minor: u64,
    pub build: u16,
    pub revision: u16,
}

impl ClickOnceVersion {
    pub fn new(major: u64, minor: u64, build: u16, revision: u16) -> Self {
        Self { major, minor, build, revision }
    }

    /// `Major.Minor.Build.*`, the form written to `ApplicationVersion`.
    pub fn wildcard(&self) -> String {
        format!("{}.{}.{}.{REVISION_WILDCARD}", self.major, self.minor, self.build)
    }
}

impl fmt::Display for ClickOnceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.build, self.revision)
    }
}

/// The parts read from a baseline version string, before any range reduction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BaselineVersion {
    pub major: u64,
    pub minor: u64,
    pub build: u64,
    pub revision: Option<u64>,
}

impl BaselineVersion {
    /// Parses `Major.Minor.Build[.Revision]`. A non-numeric fourth part (`*`, `%2a`)
    /// counts as no revision.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let malformed = || VersionError::MalformedVersion(input.to_string());
        let captures = Self::version_regex()?.captures(input).ok_or_else(malformed)?;
        let number = |m: regex::Match<'_>| m.as_str().parse::<u64>().map_err(|_| malformed());
        let required = |index: usize| captures.get(index).ok_or_else(malformed).and_then(number);

        Ok(Self {
            major: required(1)?,
            minor: required(2)?,
            build: required(3)?,
            revision: captures.get(4).map(&number).transpose()?,
        })
    }

    /// Like [`BaselineVersion::parse`], but the whole input must be
    /// `Major.Minor.Build[.Revision]` with nothing before or after it.
    pub fn parse_explicit(input: &str) -> Result<Self, VersionError> {
        if !Self::explicit_regex()?.is_match(input) {
            return Err(VersionError::MalformedVersion(input.to_string()));
        }
        Self::parse(input)
    }

    fn version_regex() -> Result<Regex, regex::Error> {
        Regex::new(r"^\s*(\d+)\.(\d+)\.(\d+)(?:\.(\d+))?")
    }

    fn explicit_regex() -> Result<Regex, regex::Error> {
        Regex::new(r"^\d+\.\d+\.\d+(?:\.\d+)?$")
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VersionPart {
    Build,
    Revision,
}

impl fmt::Display for VersionPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionPart::Build => f.write_str("Build"),
            VersionPart::Revision => f.write_str("Revision"),
        }
    }
}

/// A Build or Revision value that did not fit in 16 bits and was wrapped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Overflow {
    pub part: VersionPart,
    pub value: u64,
    pub wrapped: u16,
}

#[derive(Debug, Clone, Default)]
pub struct ResolveRequest<'a> {
    pub current_version: &'a str,
    pub current_revision: Option<&'a str>,
    pub explicit_version: Option<&'a str>,
    pub build_system_id: Option<u64>,
    pub increment_revision: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub version: ClickOnceVersion,
    pub overflows: Vec<Overflow>,
}

/// Computes the new version for one block.
///
/// The explicit version, when given, replaces the stored one as the baseline.
/// Major and Minor always come from the baseline. A build-system id overrides
/// both Build (`id / 65536`) and Revision (`id % 65536`), even when the
/// baseline carried a fourth part. Otherwise the stored revision is used
/// whenever the baseline has no fourth part or an increment was requested.
///
/// Build and Revision values past 65535 are wrapped and reported in
/// [`Resolution::overflows`]; this function never logs or touches files.
pub fn resolve(request: &ResolveRequest<'_>) -> Result<Resolution, VersionError> {
    let baseline = match request.explicit_version {
        Some(explicit) => BaselineVersion::parse_explicit(explicit)?,
        None => BaselineVersion::parse(request.current_version)?,
    };

    let mut build = baseline.build;
    let mut revision = baseline.revision;

    if let Some(id) = request.build_system_id {
        build = id / PART_MODULUS;
        revision = Some(id % PART_MODULUS);
    } else if request.increment_revision || revision.is_none() {
        let stored = parse_revision(request.current_revision)?;
        revision = Some(if request.increment_revision {
            stored
                .checked_add(1)
                .ok_or_else(|| VersionError::InvalidRevisionFormat(stored.to_string()))?
        } else {
            stored
        });
    }

    let mut overflows = Vec::new();
    let build = wrap_part(VersionPart::Build, build, &mut overflows);
    let revision = wrap_part(VersionPart::Revision, revision.unwrap_or_default(), &mut overflows);

    Ok(Resolution {
        version: ClickOnceVersion::new(baseline.major, baseline.minor, build, revision),
        overflows,
    })
}

pub fn parse_revision(stored: Option<&str>) -> Result<u64, VersionError> {
    let stored = stored.ok_or(VersionError::MissingRevision)?;
    let trimmed = stored.trim();
    // u64's FromStr would also take a leading '+'
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VersionError::InvalidRevisionFormat(stored.to_string()));
    }
    trimmed
        .parse()
        .map_err(|_| VersionError::InvalidRevisionFormat(stored.to_string()))
}

fn wrap_part(part: VersionPart, value: u64, overflows: &mut Vec<Overflow>) -> u16 {
    let wrapped = (value % PART_MODULUS) as u16;
    if u64::from(wrapped) != value {
        overflows.push(Overflow { part, value, wrapped });
    }
    wrapped
}
