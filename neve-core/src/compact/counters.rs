use crate::object::{Kind, MAX_CTOR_TAG, tag};

/// Per-compaction tally of how many objects of each kind were copied.
///
/// Each compactor owns its own tally,
/// so concurrent compactions never share counter state.
/// The numbers are purely diagnostic;
/// nothing in the compactor depends on them.
#[derive(Clone)]
pub struct TagCounters
{
    counts: [u64; 256],
}

impl TagCounters
{
    /// Create a tally with all counts at zero.
    pub fn new() -> Self
    {
        Self{counts: [0; 256]}
    }

    /// Count one copied object with the given tag.
    pub (super) fn note(&mut self, t: u8)
    {
        self.counts[t as usize] += 1;
    }

    /// The number of copied objects of the given kind.
    ///
    /// For `Kind::Ctor` the count covers just that constructor tag.
    pub fn count(&self, kind: Kind) -> u64
    {
        let t = match kind {
            Kind::Ctor(t)     => t,
            Kind::Array       => tag::ARRAY,
            Kind::ScalarArray => tag::SCALAR_ARRAY,
            Kind::String      => tag::STRING,
            Kind::Bigint      => tag::BIGINT,
            Kind::Thunk       => tag::THUNK,
            Kind::Task        => tag::TASK,
            Kind::Ref         => tag::REF,
            Kind::Closure     => tag::CLOSURE,
            Kind::External    => tag::EXTERNAL,
            Kind::Reserved    => tag::RESERVED,
        };
        self.counts[t as usize]
    }

    /// The number of copied constructor objects, over all tags.
    pub fn ctor_count(&self) -> u64
    {
        self.counts[..= MAX_CTOR_TAG as usize].iter().sum()
    }

    /// Log the non-zero counts.
    pub fn log_summary(&self)
    {
        let kinds = [
            ("array",  tag::ARRAY),
            ("sarray", tag::SCALAR_ARRAY),
            ("string", tag::STRING),
            ("bigint", tag::BIGINT),
            ("thunk",  tag::THUNK),
            ("task",   tag::TASK),
            ("ref",    tag::REF),
        ];

        for (name, t) in kinds {
            if self.counts[t as usize] != 0 {
                log::debug!("#{}: {}", name, self.counts[t as usize]);
            }
        }

        log::debug!("#ctor: {}", self.ctor_count());
    }
}

impl Default for TagCounters
{
    fn default() -> Self
    {
        Self::new()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn counts_are_per_tag()
    {
        let mut counters = TagCounters::new();
        counters.note(0);
        counters.note(0);
        counters.note(7);
        counters.note(tag::STRING);

        assert_eq!(counters.count(Kind::Ctor(0)), 2);
        assert_eq!(counters.count(Kind::Ctor(7)), 1);
        assert_eq!(counters.count(Kind::String), 1);
        assert_eq!(counters.count(Kind::Array), 0);
        assert_eq!(counters.ctor_count(), 3);
    }

    #[test]
    fn summary_covers_populated_tallies()
    {
        let mut counters = TagCounters::new();
        counters.note(tag::ARRAY);
        counters.note(tag::BIGINT);
        counters.note(5);
        counters.log_summary();
    }
}
