//! Threshold classification of measured values.
//!
//! Two tier shapes are supported:
//!
//! - [`MembershipTiers`]: three sets of exact values (`ok`, `warn`, `error`),
//!   used for HTTP status codes. The first set containing the value wins.
//! - [`LatencyTiers`]: increasing duration boundaries, either the three-tier
//!   [`LatencyTiers::Bounded`] shape (with an `unknown` tier above the error
//!   bound) or the two-tier [`LatencyTiers::Threshold`] shape (everything past
//!   the error bound is `err`).
//!
//! # Examples
//! ```rust
//! use netcheck::classify::{classify_by_membership, MembershipTiers, Verdict};
//!
//! let tiers = MembershipTiers::new([200], [400], [500]);
//! assert_eq!(classify_by_membership(&200, &tiers), Verdict::Ok);
//! assert_eq!(classify_by_membership(&1200, &tiers), Verdict::Unknown);
//! ```

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Classification of one measured dimension.
///
/// Variants are declared in increasing order of severity so that `Ord`
/// gives `ok < warn < err < unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Ok,
    Warn,
    Err,
    Unknown,
}

impl Verdict {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Verdict::Ok => "ok",
            Verdict::Warn => "warn",
            Verdict::Err => "err",
            Verdict::Unknown => "unknown",
        }
    }

    /// Returns the most severe verdict, or `None` for an empty iterator.
    pub fn worst<I>(verdicts: I) -> Option<Verdict>
    where
        I: IntoIterator<Item = Verdict>,
    {
        verdicts.into_iter().max()
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three sets of exact values, evaluated `ok` → `warn` → `error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipTiers<T: Ord> {
    pub ok: BTreeSet<T>,
    pub warn: BTreeSet<T>,
    pub error: BTreeSet<T>,
}

impl<T: Ord> MembershipTiers<T> {
    pub fn new<A, B, C>(ok: A, warn: B, error: C) -> Self
    where
        A: IntoIterator<Item = T>,
        B: IntoIterator<Item = T>,
        C: IntoIterator<Item = T>,
    {
        Self {
            ok: ok.into_iter().collect(),
            warn: warn.into_iter().collect(),
            error: error.into_iter().collect(),
        }
    }
}

/// HTTP status code tiers.
pub type StatusTiers = MembershipTiers<u16>;

impl Default for StatusTiers {
    fn default() -> Self {
        Self::new([200], [400], [500])
    }
}

/// Ordered duration boundaries for one latency dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyTiers {
    /// `<= ok_max` ok, `<= warn_max` warn, `<= error_max` err, else unknown.
    Bounded {
        ok_max: Duration,
        warn_max: Duration,
        error_max: Duration,
    },
    /// `<= warn_max` ok, `<= error_max` warn, else err.
    Threshold {
        warn_max: Duration,
        error_max: Duration,
    },
}

impl LatencyTiers {
    pub fn bounded(ok_max: Duration, warn_max: Duration, error_max: Duration) -> Self {
        LatencyTiers::Bounded {
            ok_max,
            warn_max,
            error_max,
        }
    }

    pub fn threshold(warn_max: Duration, error_max: Duration) -> Self {
        LatencyTiers::Threshold {
            warn_max,
            error_max,
        }
    }

    /// Checks that the boundaries never decrease.
    pub fn is_ordered(&self) -> bool {
        match *self {
            LatencyTiers::Bounded {
                ok_max,
                warn_max,
                error_max,
            } => ok_max <= warn_max && warn_max <= error_max,
            LatencyTiers::Threshold {
                warn_max,
                error_max,
            } => warn_max <= error_max,
        }
    }

    /// Verdict for a dimension that produced no measurement at all.
    pub fn missing_verdict(&self) -> Verdict {
        match self {
            LatencyTiers::Bounded { .. } => Verdict::Unknown,
            LatencyTiers::Threshold { .. } => Verdict::Err,
        }
    }
}

/// Classifies `value` by exact set containment.
pub fn classify_by_membership<T: Ord>(value: &T, tiers: &MembershipTiers<T>) -> Verdict {
    if tiers.ok.contains(value) {
        Verdict::Ok
    } else if tiers.warn.contains(value) {
        Verdict::Warn
    } else if tiers.error.contains(value) {
        Verdict::Err
    } else {
        Verdict::Unknown
    }
}

/// Classifies a measured duration against ordered boundaries.
pub fn classify_by_boundary(value: Duration, tiers: &LatencyTiers) -> Verdict {
    match *tiers {
        LatencyTiers::Bounded {
            ok_max,
            warn_max,
            error_max,
        } => {
            if value <= ok_max {
                Verdict::Ok
            } else if value <= warn_max {
                Verdict::Warn
            } else if value <= error_max {
                Verdict::Err
            } else {
                Verdict::Unknown
            }
        }
        LatencyTiers::Threshold {
            warn_max,
            error_max,
        } => {
            if value <= warn_max {
                Verdict::Ok
            } else if value <= error_max {
                Verdict::Warn
            } else {
                Verdict::Err
            }
        }
    }
}
