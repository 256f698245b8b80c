//! Allow-list value sets and per-argument filters
//!
//! A `ValueSet` holds the numeric values one field of a syscall event may
//! take. Each value may carry a nested `ArgFilter` that further restricts a
//! specific argument whenever that value matches. Sets are materialized
//! sorted and duplicate-free before any code is generated from them.

/// One permitted value, optionally qualified by an argument filter.
#[derive(Debug, Clone)]
pub struct ValueSpec {
    /// The permitted numeric value.
    pub value: u32,
    /// Nested restriction applied after this value matches.
    pub arg: Option<ArgFilter>,
}

/// Restricts one syscall argument to a set of permitted values.
#[derive(Debug, Clone)]
pub struct ArgFilter {
    /// Argument position (0..=5, the six seccomp argument slots).
    pub index: u8,
    /// Values the argument may take.
    pub values: ValueSet,
}

impl ArgFilter {
    /// Create a filter for argument `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a valid seccomp argument position.
    pub fn new(index: u8, values: ValueSet) -> Self {
        assert!(index < 6, "seccomp exposes exactly six argument slots");
        Self { index, values }
    }
}

/// A named collection of permitted values.
///
/// Values may be added in any order and may repeat; `prepare` establishes the
/// sorted, deduplicated form code generation relies on. The label only feeds
/// diagnostics.
#[derive(Debug, Clone)]
pub struct ValueSet {
    label: String,
    values: Vec<ValueSpec>,
}

impl ValueSet {
    /// Create an empty set labelled for diagnostics (e.g. "syscall").
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            values: Vec::new(),
        }
    }

    /// Permit `value` unconditionally.
    pub fn permit(&mut self, value: u32) {
        self.values.push(ValueSpec { value, arg: None });
    }

    /// Permit `value` only when `filter` also matches.
    pub fn permit_when(&mut self, value: u32, filter: ArgFilter) {
        self.values.push(ValueSpec {
            value,
            arg: Some(filter),
        });
    }

    /// Diagnostic label for this set.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The values in their current order.
    pub fn values(&self) -> &[ValueSpec] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sort ascending and drop later duplicates, first occurrence wins.
    ///
    /// Each dropped duplicate is logged once, naming the owning set. Nested
    /// argument filters of the surviving entries are prepared as well.
    /// Identical input always yields an identical prepared sequence.
    pub(crate) fn prepare(&mut self) {
        let Self { label, values } = self;
        values.sort_by_key(|spec| spec.value);
        values.dedup_by(|later, first| {
            if later.value == first.value {
                tracing::warn!("duplicate value in {} set: {:#x}", label, later.value);
                true
            } else {
                false
            }
        });

        for spec in values.iter_mut() {
            if let Some(filter) = &mut spec.arg {
                filter.values.prepare();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values_of(set: &ValueSet) -> Vec<u32> {
        set.values().iter().map(|spec| spec.value).collect()
    }

    #[test]
    fn test_prepare_sorts_ascending() {
        let mut set = ValueSet::new("test");
        for v in [60, 2, 0, 3, 1] {
            set.permit(v);
        }
        set.prepare();
        assert_eq!(values_of(&set), vec![0, 1, 2, 3, 60]);
    }

    #[test]
    fn test_prepare_drops_later_duplicates() {
        let mut set = ValueSet::new("test");
        for v in [5, 5, 5, 7] {
            set.permit(v);
        }
        set.prepare();
        assert_eq!(values_of(&set), vec![5, 7]);
    }

    #[test]
    fn test_prepare_first_occurrence_wins() {
        // The first of two duplicates carries the argument filter; the
        // surviving entry must keep it.
        let mut inner = ValueSet::new("arg");
        inner.permit(1);
        let mut set = ValueSet::new("test");
        set.permit_when(16, ArgFilter::new(1, inner));
        set.permit(16);
        set.prepare();
        assert_eq!(set.len(), 1);
        assert!(set.values()[0].arg.is_some());
    }

    #[test]
    fn test_prepare_is_deterministic() {
        let build = || {
            let mut set = ValueSet::new("test");
            for v in [9, 1, 9, 4, 1, 4] {
                set.permit(v);
            }
            set.prepare();
            values_of(&set)
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_prepare_recurses_into_arg_filters() {
        let mut inner = ValueSet::new("arg");
        for v in [3, 1, 3, 2] {
            inner.permit(v);
        }
        let mut set = ValueSet::new("test");
        set.permit_when(16, ArgFilter::new(0, inner));
        set.prepare();
        let filter = set.values()[0].arg.as_ref().unwrap();
        assert_eq!(values_of(&filter.values), vec![1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "six argument slots")]
    fn test_arg_filter_rejects_bad_index() {
        ArgFilter::new(6, ValueSet::new("arg"));
    }
}
