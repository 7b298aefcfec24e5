//! Package versions and version constraints.
//!
//! Versions come from git tags, which are frequently partial (`v1.2`), so
//! parsing pads missing components with zeros. Constraints are comma-separated
//! comparators (`>=1.2, <2.0`); a bare version or `==` means an exact match.
//!
//! Intersecting constraints is just concatenating their comparators, but an
//! empty intersection has to be detected up front so that the resolver can
//! report a conflict between requesters rather than a missing version. That is
//! decided by mapping every comparator onto an interval of versions.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::{Comparator, Op, Version, VersionReq};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
  #[error("invalid version '{input}': {message}")]
  InvalidVersion { input: String, message: String },

  #[error("invalid version constraint '{input}': {message}")]
  InvalidSpec { input: String, message: String },

  #[error("no version can satisfy both '{left}' and '{right}'")]
  Unsatisfiable { left: String, right: String },

  #[error("unsupported comparator in '{spec}'")]
  UnsupportedOperator { spec: String },
}

/// Parse a version, tolerating a leading `v` and missing minor/patch parts.
///
/// ```
/// use clyde_lib::version::parse_version;
/// assert_eq!(parse_version("v1.2").unwrap().to_string(), "1.2.0");
/// ```
pub fn parse_version(input: &str) -> Result<Version, VersionError> {
  let trimmed = input.trim();
  let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

  let split_at = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
  let (core, suffix) = trimmed.split_at(split_at);

  let mut padded = core.to_string();
  for _ in core.split('.').count()..3 {
    padded.push_str(".0");
  }
  padded.push_str(suffix);

  Version::parse(&padded).map_err(|e| VersionError::InvalidVersion {
    input: input.to_string(),
    message: e.to_string(),
  })
}

/// A set of acceptable versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSpec(VersionReq);

impl VersionSpec {
  /// The spec that accepts every version.
  pub fn any() -> Self {
    Self(VersionReq::STAR)
  }

  /// The spec that accepts exactly `version`.
  pub fn exact(version: &Version) -> Self {
    Self(VersionReq {
      comparators: vec![Comparator {
        op: Op::Exact,
        major: version.major,
        minor: Some(version.minor),
        patch: Some(version.patch),
        pre: version.pre.clone(),
      }],
    })
  }

  pub fn parse(input: &str) -> Result<Self, VersionError> {
    let normalized: Vec<String> = input
      .split(',')
      .map(str::trim)
      .filter(|part| !part.is_empty())
      .map(normalize_comparator)
      .collect();

    if normalized.is_empty() {
      return Err(VersionError::InvalidSpec {
        input: input.to_string(),
        message: "empty constraint".to_string(),
      });
    }

    let req = VersionReq::parse(&normalized.join(", ")).map_err(|e| VersionError::InvalidSpec {
      input: input.to_string(),
      message: e.to_string(),
    })?;
    Ok(Self(req))
  }

  pub fn matches(&self, version: &Version) -> bool {
    self.0.matches(version)
  }

  /// Combine two specs into one accepting only versions both accept.
  ///
  /// Fails when no version could ever satisfy the combination, independent of
  /// which versions happen to exist.
  pub fn intersect(&self, other: &VersionSpec) -> Result<VersionSpec, VersionError> {
    let mut comparators = self.0.comparators.clone();
    for comparator in &other.0.comparators {
      if !comparators.contains(comparator) {
        comparators.push(comparator.clone());
      }
    }
    let combined = VersionSpec(VersionReq { comparators });

    if !combined.is_satisfiable()? {
      return Err(VersionError::Unsatisfiable {
        left: self.to_string(),
        right: other.to_string(),
      });
    }
    Ok(combined)
  }

  /// The subset of `versions` accepted by this spec, in input order.
  pub fn filter<'a>(&self, versions: &'a [Version]) -> Vec<&'a Version> {
    versions.iter().filter(|v| self.matches(v)).collect()
  }

  /// The highest version in `versions` accepted by this spec.
  pub fn best(&self, versions: &[Version]) -> Option<Version> {
    self.filter(versions).into_iter().max().cloned()
  }

  fn is_satisfiable(&self) -> Result<bool, VersionError> {
    let mut range = Interval::unbounded();
    for comparator in &self.0.comparators {
      let bounds = Interval::of(comparator).ok_or_else(|| VersionError::UnsupportedOperator {
        spec: self.to_string(),
      })?;
      range = range.narrow(bounds);
    }
    Ok(!range.is_empty())
  }
}

impl Default for VersionSpec {
  fn default() -> Self {
    Self::any()
  }
}

impl fmt::Display for VersionSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.0.comparators.is_empty() {
      return f.write_str("*");
    }
    write!(f, "{}", self.0)
  }
}

impl FromStr for VersionSpec {
  type Err = VersionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

fn normalize_comparator(part: &str) -> String {
  if let Some(rest) = part.strip_prefix("==") {
    return format!("={}", strip_v(rest.trim()));
  }
  let op_len = part
    .find(|c: char| c.is_ascii_digit() || c == 'v' || c == '*')
    .unwrap_or(0);
  let (op, version) = part.split_at(op_len);
  let op = op.trim();
  let version = strip_v(version.trim());
  if op.is_empty() && version != "*" {
    format!("={version}")
  } else {
    format!("{op}{version}")
  }
}

fn strip_v(version: &str) -> &str {
  version.strip_prefix('v').unwrap_or(version)
}

/// One end of an interval. `inclusive` only matters when the versions are equal.
#[derive(Debug, Clone)]
struct Bound {
  version: Version,
  inclusive: bool,
}

#[derive(Debug, Clone)]
struct Interval {
  lower: Option<Bound>,
  upper: Option<Bound>,
}

impl Interval {
  fn unbounded() -> Self {
    Self { lower: None, upper: None }
  }

  fn from(lo: Version, lo_inclusive: bool) -> Self {
    Self {
      lower: Some(Bound {
        version: lo,
        inclusive: lo_inclusive,
      }),
      upper: None,
    }
  }

  fn below(hi: Version, hi_inclusive: bool) -> Self {
    Self {
      lower: None,
      upper: Some(Bound {
        version: hi,
        inclusive: hi_inclusive,
      }),
    }
  }

  /// `[lo, hi)`, or `[lo, ..)` without an upper end.
  fn up_to(lo: Version, hi: Option<Version>) -> Self {
    match hi {
      Some(hi) => Self::between(lo, hi),
      None => Self::from(lo, true),
    }
  }

  fn between(lo: Version, hi: Version) -> Self {
    Self {
      lower: Some(Bound {
        version: lo,
        inclusive: true,
      }),
      upper: Some(Bound {
        version: hi,
        inclusive: false,
      }),
    }
  }

  /// Interval of versions accepted by a single comparator.
  ///
  /// An upper bound that would overflow a version component is dropped.
  fn of(c: &Comparator) -> Option<Self> {
    let major = c.major;
    let floor = Version::new(major, c.minor.unwrap_or(0), c.patch.unwrap_or(0));
    let next_major = || major.checked_add(1).map(|m| Version::new(m, 0, 0));
    let next_minor = |minor: u64| minor.checked_add(1).map(|m| Version::new(major, m, 0));
    // First version past the partially specified one: 1 -> 2.0.0, 1.2 -> 1.3.0
    let next_partial = match (c.minor, c.patch) {
      (None, _) => next_major(),
      (Some(minor), None) => next_minor(minor),
      (Some(minor), Some(patch)) => patch.checked_add(1).map(|p| Version::new(major, minor, p)),
    };

    let interval = match c.op {
      Op::Exact | Op::Wildcard => match c.patch {
        Some(_) => Self {
          lower: Some(Bound {
            version: floor.clone(),
            inclusive: true,
          }),
          upper: Some(Bound {
            version: floor,
            inclusive: true,
          }),
        },
        None => Self::up_to(floor, next_partial),
      },
      Op::Greater => match (c.patch, next_partial) {
        (Some(_), _) => Self::from(floor, false),
        (None, Some(next)) => Self::from(next, true),
        // Nothing lies past the largest representable version.
        (None, None) => Self::between(floor.clone(), floor),
      },
      Op::GreaterEq => Self::from(floor, true),
      Op::Less => Self::below(floor, false),
      Op::LessEq => match (c.patch, next_partial) {
        (Some(_), _) => Self::below(floor, true),
        (None, Some(next)) => Self::below(next, false),
        (None, None) => Self::unbounded(),
      },
      Op::Tilde => {
        let hi = match c.minor {
          None => next_major(),
          Some(minor) => next_minor(minor),
        };
        Self::up_to(floor, hi)
      }
      Op::Caret => {
        let hi = match (major, c.minor, c.patch) {
          (0, None, _) => Some(Version::new(1, 0, 0)),
          (0, Some(0), None) => Some(Version::new(0, 1, 0)),
          (0, Some(0), Some(patch)) => patch.checked_add(1).map(|p| Version::new(0, 0, p)),
          (0, Some(minor), _) => next_minor(minor),
          (_, _, _) => next_major(),
        };
        Self::up_to(floor, hi)
      }
      _ => return None,
    };
    Some(interval)
  }

  fn narrow(self, other: Interval) -> Interval {
    let lower = match (self.lower, other.lower) {
      (Some(a), Some(b)) => Some(match a.version.cmp(&b.version) {
        Ordering::Greater => a,
        Ordering::Less => b,
        Ordering::Equal => Bound {
          version: a.version,
          inclusive: a.inclusive && b.inclusive,
        },
      }),
      (a, b) => a.or(b),
    };
    let upper = match (self.upper, other.upper) {
      (Some(a), Some(b)) => Some(match a.version.cmp(&b.version) {
        Ordering::Less => a,
        Ordering::Greater => b,
        Ordering::Equal => Bound {
          version: a.version,
          inclusive: a.inclusive && b.inclusive,
        },
      }),
      (a, b) => a.or(b),
    };
    Interval { lower, upper }
  }

  fn is_empty(&self) -> bool {
    match (&self.lower, &self.upper) {
      (Some(lo), Some(hi)) => match lo.version.cmp(&hi.version) {
        Ordering::Greater => true,
        Ordering::Equal => !(lo.inclusive && hi.inclusive),
        Ordering::Less => false,
      },
      _ => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn v(s: &str) -> Version {
    parse_version(s).unwrap()
  }

  mod parsing {
    use super::*;

    #[test]
    fn pads_partial_versions() {
      assert_eq!(v("1"), Version::new(1, 0, 0));
      assert_eq!(v("1.2"), Version::new(1, 2, 0));
      assert_eq!(v("v2.0.1"), Version::new(2, 0, 1));
    }

    #[test]
    fn keeps_prerelease_suffix() {
      assert_eq!(v("v1.2-rc1").to_string(), "1.2.0-rc1");
    }

    #[test]
    fn rejects_garbage() {
      assert!(matches!(parse_version("latest"), Err(VersionError::InvalidVersion { .. })));
    }

    #[test]
    fn bare_version_is_exact() {
      let spec = VersionSpec::parse("1.2.0").unwrap();
      assert!(spec.matches(&v("1.2.0")));
      assert!(!spec.matches(&v("1.3.0")));
    }

    #[test]
    fn double_equals_is_exact() {
      let spec = VersionSpec::parse("==1.4.2").unwrap();
      assert!(spec.matches(&v("1.4.2")));
      assert!(!spec.matches(&v("1.4.3")));
    }

    #[test]
    fn star_matches_everything() {
      let spec = VersionSpec::parse("*").unwrap();
      assert!(spec.matches(&v("0.0.1")));
      assert!(spec.matches(&v("9.9.9")));
    }

    #[test]
    fn empty_spec_is_an_error() {
      assert!(matches!(VersionSpec::parse(" , "), Err(VersionError::InvalidSpec { .. })));
    }
  }

  mod selection {
    use super::*;

    #[test]
    fn best_picks_highest_match() {
      let versions = vec![v("1.0"), v("1.2"), v("2.0")];
      let spec = VersionSpec::parse(">=1.0,<2.0").unwrap();
      assert_eq!(spec.best(&versions), Some(v("1.2")));
    }

    #[test]
    fn best_of_nothing_is_none() {
      let spec = VersionSpec::parse(">=3.0").unwrap();
      assert_eq!(spec.best(&[v("1.0"), v("2.0")]), None);
    }

    #[test]
    fn filter_preserves_order() {
      let versions = vec![v("2.0"), v("1.0"), v("1.5")];
      let spec = VersionSpec::parse("<2.0").unwrap();
      let matched: Vec<_> = spec.filter(&versions).into_iter().cloned().collect();
      assert_eq!(matched, vec![v("1.0"), v("1.5")]);
    }
  }

  mod intersection {
    use super::*;

    fn spec(s: &str) -> VersionSpec {
      VersionSpec::parse(s).unwrap()
    }

    #[test]
    fn overlapping_ranges_intersect() {
      let combined = spec(">=1.0").intersect(&spec("<2.0")).unwrap();
      assert!(combined.matches(&v("1.5")));
      assert!(!combined.matches(&v("2.0")));
      assert!(!combined.matches(&v("0.9")));
    }

    #[test]
    fn intersection_is_commutative() {
      let versions = vec![v("1.0"), v("1.1"), v("1.9"), v("2.0")];
      let a = spec(">=1.1");
      let b = spec("<2.0");
      let ab = a.intersect(&b).unwrap();
      let ba = b.intersect(&a).unwrap();
      assert_eq!(ab.best(&versions), ba.best(&versions));
    }

    #[test]
    fn disjoint_ranges_fail() {
      let err = spec(">=2.0").intersect(&spec("<1.0")).unwrap_err();
      assert!(matches!(err, VersionError::Unsatisfiable { .. }));
    }

    #[test]
    fn different_exact_versions_fail() {
      assert!(spec("==1.0.0").intersect(&spec("==1.0.1")).is_err());
    }

    #[test]
    fn touching_exclusive_bounds_fail() {
      assert!(spec(">1.0.0").intersect(&spec("<=1.0.0")).is_err());
      assert!(spec(">=1.0.0").intersect(&spec("<=1.0.0")).is_ok());
    }

    #[test]
    fn caret_and_tilde_have_upper_bounds() {
      assert!(spec("^1.2").intersect(&spec(">=2.0")).is_err());
      assert!(spec("~1.2").intersect(&spec(">=1.3")).is_err());
      assert!(spec("^0.3").intersect(&spec("<0.4")).is_ok());
    }

    #[test]
    fn maximal_components_do_not_overflow() {
      let max = u64::MAX;
      assert!(spec(&format!("^{max}.0")).intersect(&spec(&format!(">={max}.5"))).is_ok());
      assert!(spec(&format!("~1.{max}")).intersect(&spec(&format!(">=1.{max}.3"))).is_ok());
      assert!(spec(&format!("^0.0.{max}")).intersect(&spec(&format!(">=0.0.{max}"))).is_ok());
      assert!(spec(&format!("<={max}")).intersect(&spec(&format!(">={max}.{max}"))).is_ok());
      assert!(spec(&format!(">{max}")).intersect(&spec(">=0.0.0")).is_err());
    }

    #[test]
    fn exact_inside_range_succeeds() {
      let combined = spec(">=1.0, <2.0").intersect(&spec("1.4.0")).unwrap();
      assert_eq!(combined.best(&[v("1.4.0"), v("1.5.0")]), Some(v("1.4.0")));
    }
  }
}
