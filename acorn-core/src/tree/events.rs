use crate::nut::Nut;

/// Reactive notification fired synchronously after a committed operation.
/// A failure before commit suppresses the event.
#[derive(Debug, Clone)]
pub enum TreeEvent<T> {
    Stash { nut: Nut<T> },
    Toss { id: String },
    Squabble { winner: Nut<T> },
}

impl<T> TreeEvent<T> {
    pub fn id(&self) -> &str {
        match self {
            TreeEvent::Stash { nut } => &nut.id,
            TreeEvent::Toss { id } => id,
            TreeEvent::Squabble { winner } => &winner.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);
