//! Status-string translation tables.
//!
//! Each resource kind owns a finite table mapping backend status strings to
//! its canonical state enum. Lookup is case-insensitive. An unrecognized
//! status is logged and mapped to the kind's pending/unknown default; a
//! status value alone must never fail a parse.

use tracing::warn;

/// Case-insensitive mapping from backend status strings to a canonical state.
pub struct StatusTable<S: Copy + 'static> {
    kind: &'static str,
    entries: &'static [(&'static str, S)],
    fallback: S,
}

impl<S: Copy + std::fmt::Debug> StatusTable<S> {
    /// Builds a table for the named resource kind with the given fallback
    /// state for unrecognized or absent status strings.
    #[must_use]
    pub const fn new(
        kind: &'static str,
        entries: &'static [(&'static str, S)],
        fallback: S,
    ) -> Self {
        Self {
            kind,
            entries,
            fallback,
        }
    }

    /// Resolves a raw status string to the canonical state.
    #[must_use]
    pub fn resolve(&self, raw: Option<&str>) -> S {
        let Some(raw) = raw else {
            return self.fallback;
        };
        for (name, state) in self.entries {
            if name.eq_ignore_ascii_case(raw) {
                return *state;
            }
        }
        warn!(
            kind = self.kind,
            status = raw,
            fallback = ?self.fallback,
            "unrecognized status string, mapping to default state"
        );
        self.fallback
    }
}

/// Lightweight id + state pair returned by the bulk status listings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceStatus<S> {
    /// Provider-assigned identifier.
    pub id: String,
    /// Canonical state at listing time.
    pub state: S,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    enum Demo {
        Pending,
        Ready,
    }

    const TABLE: StatusTable<Demo> = StatusTable::new(
        "demo",
        &[("active", Demo::Ready), ("build", Demo::Pending)],
        Demo::Pending,
    );

    #[rstest]
    #[case(Some("ACTIVE"), Demo::Ready)]
    #[case(Some("Active"), Demo::Ready)]
    #[case(Some("build"), Demo::Pending)]
    #[case(Some("zombie"), Demo::Pending)]
    #[case(None, Demo::Pending)]
    fn resolve_is_case_insensitive_with_fallback(
        #[case] raw: Option<&str>,
        #[case] expected: Demo,
    ) {
        assert_eq!(TABLE.resolve(raw), expected);
    }
}
