use crate::nut::Nut;

/// Outcome of a conflict judgement. A judge only ever picks one of its two
/// inputs, never a synthesized third nut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    KeepExisting,
    TakeIncoming,
}

/// Deterministic policy for resolving two nuts stored under the same id.
pub trait Judge<T>: Send + Sync {
    fn name(&self) -> &'static str;
    fn judge(&self, existing: &Nut<T>, incoming: &Nut<T>) -> Verdict;
}

/// Default judge: later timestamp wins, ties broken by larger version, then
/// by lexicographically larger origin node, then stability (existing wins).
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampJudge;

impl<T> Judge<T> for TimestampJudge {
    fn name(&self) -> &'static str {
        "timestamp"
    }

    fn judge(&self, existing: &Nut<T>, incoming: &Nut<T>) -> Verdict {
        let ordering = incoming
            .timestamp
            .cmp(&existing.timestamp)
            .then(incoming.version.cmp(&existing.version))
            .then(incoming.origin_node_id.cmp(&existing.origin_node_id));
        if ordering == std::cmp::Ordering::Greater {
            Verdict::TakeIncoming
        } else {
            Verdict::KeepExisting
        }
    }
}

/// Larger version wins outright; timestamps are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionJudge;

impl<T> Judge<T> for VersionJudge {
    fn name(&self) -> &'static str {
        "version"
    }

    fn judge(&self, existing: &Nut<T>, incoming: &Nut<T>) -> Verdict {
        if incoming.version > existing.version {
            Verdict::TakeIncoming
        } else {
            Verdict::KeepExisting
        }
    }
}

/// Caller-supplied predicate. The predicate must stay deterministic for
/// replication to converge.
pub struct CustomJudge<T> {
    name: &'static str,
    decide: Box<dyn Fn(&Nut<T>, &Nut<T>) -> Verdict + Send + Sync>,
}

impl<T> CustomJudge<T> {
    pub fn new(
        name: &'static str,
        decide: impl Fn(&Nut<T>, &Nut<T>) -> Verdict + Send + Sync + 'static,
    ) -> Self {
        CustomJudge {
            name,
            decide: Box::new(decide),
        }
    }
}

impl<T> Judge<T> for CustomJudge<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn judge(&self, existing: &Nut<T>, incoming: &Nut<T>) -> Verdict {
        (self.decide)(existing, incoming)
    }
}
