use anyhow::anyhow;
use serde::Serialize;
use std::{fmt, str};

/// The identifier of a [`Node`] within a [`Graph`].
///
/// Identifiers are handed out in insertion order, starting at `1`, and are
/// never reused by the graph that created them. A graph cloned with
/// [`Graph::clone_with_relationships`] keeps the identifiers of the nodes it
/// retains so results of the clone can be compared to results of the
/// original.
///
/// [`Node`]: crate::node::Node
/// [`Graph`]: crate::graph::Graph
/// [`Graph::clone_with_relationships`]: crate::graph::Graph::clone_with_relationships
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    pub const ZERO: Self = NodeId::new(0);
    pub const ONE: Self = NodeId::new(1);

    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use = "function does not modify the current value"]
    pub(crate) fn next(self) -> Self {
        Self::new(self.0 + 1)
    }
}

impl str::FromStr for NodeId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self).map_err(|error| anyhow!("{error}"))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print() {
        assert_eq!(format!("{}", NodeId(42)), "42")
    }

    #[test]
    fn parse() {
        assert_eq!("42".parse::<NodeId>().unwrap(), NodeId(42));
        assert!("node".parse::<NodeId>().is_err());
    }

    #[test]
    fn next() {
        assert_eq!(NodeId::ZERO.next(), NodeId::ONE);
        assert!(NodeId::ONE < NodeId::ONE.next());
    }
}
