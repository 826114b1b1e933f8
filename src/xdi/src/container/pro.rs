use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

use snafu::prelude::*;
use tracing::debug;

use crate::container::{Container, ContainerId};

/// The provider resolution order of a container.
///
/// The container itself always comes first, followed by its transitive
/// bases linearized the same way a method resolution order is: every
/// container precedes its own bases, and the declaration order of bases is
/// preserved.
#[derive(Clone)]
pub struct Pro {
    owner: ContainerId,
    ancestors: Vec<Container>,
    index: HashMap<ContainerId, usize>,
}

impl Pro {
    fn new(owner: ContainerId, ancestors: Vec<Container>) -> Self {
        let index = std::iter::once(owner)
            .chain(ancestors.iter().map(Container::id))
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();
        Self {
            owner,
            ancestors,
            index,
        }
    }

    /// Returns the precedence of `id`, 0 being the owner.
    pub fn get(&self, id: ContainerId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn contains(&self, id: ContainerId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ContainerId> + '_ {
        std::iter::once(self.owner).chain(self.ancestors.iter().map(Container::id))
    }

    pub(crate) fn ancestors(&self) -> &[Container] {
        &self.ancestors
    }
}

impl std::fmt::Debug for Pro {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

thread_local! {
    static LINEARIZING: RefCell<HashSet<ContainerId>> = RefCell::new(HashSet::new());
}

struct LinearizingGuard {
    id: ContainerId,
}

impl LinearizingGuard {
    fn enter(id: ContainerId) -> Option<Self> {
        LINEARIZING
            .with_borrow_mut(|set| set.insert(id))
            .then_some(Self { id })
    }
}

impl Drop for LinearizingGuard {
    fn drop(&mut self) {
        LINEARIZING.with_borrow_mut(|set| set.remove(&self.id));
    }
}

pub(super) fn linearize(container: &Container) -> Result<Pro, ProError> {
    let _guard = LinearizingGuard::enter(container.id()).context(CyclicSnafu {
        container: container.name(),
    })?;

    let bases = container.bases();
    let mut sequences: Vec<VecDeque<Container>> = Vec::with_capacity(bases.len() + 1);
    for base in &bases {
        let pro = base.pro()?;
        let mut sequence = VecDeque::with_capacity(pro.len());
        sequence.push_back(base.clone());
        sequence.extend(pro.ancestors().iter().cloned());
        sequences.push(sequence);
    }
    sequences.push(bases.into_iter().collect());

    let mut ancestors = Vec::new();
    loop {
        sequences.retain(|sequence| !sequence.is_empty());
        if sequences.is_empty() {
            break;
        }

        let head = sequences
            .iter()
            .filter_map(VecDeque::front)
            .find(|head| !in_any_tail(&sequences, head))
            .cloned()
            .context(InconsistentSnafu {
                container: container.name(),
            })?;

        for sequence in &mut sequences {
            if sequence.front() == Some(&head) {
                sequence.pop_front();
            }
        }
        ancestors.push(head);
    }

    let pro = Pro::new(container.id(), ancestors);
    debug!(container = %container.name(), order = ?pro, "computed provider resolution order");
    Ok(pro)
}

fn in_any_tail(sequences: &[VecDeque<Container>], candidate: &Container) -> bool {
    sequences
        .iter()
        .any(|sequence| sequence.iter().skip(1).any(|c| c == candidate))
}

#[derive(Debug, Clone, Snafu)]
#[non_exhaustive]
pub enum ProError {
    #[snafu(display("could not find a consistent resolution order for container {container}"))]
    #[non_exhaustive]
    Inconsistent { container: String },
    #[snafu(display("container {container} extends itself"))]
    #[non_exhaustive]
    Cyclic { container: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(container: &Container) -> Vec<String> {
        std::iter::once(container.clone())
            .chain(container.pro().unwrap().ancestors().iter().cloned())
            .map(|c| c.name().to_string())
            .collect()
    }

    #[test]
    fn linearize_succeeds_when_container_has_no_base() {
        let alone = Container::new("alone");
        let pro = alone.pro().unwrap();
        assert_eq!(pro.len(), 1);
        assert_eq!(pro.get(alone.id()), Some(0));
    }

    #[test]
    fn linearize_succeeds_on_diamond() {
        let d = Container::new("d");
        let b = Container::new("b");
        let c = Container::new("c");
        let a = Container::new("a");
        b.extend([&d]).unwrap();
        c.extend([&d]).unwrap();
        a.extend([&b, &c]).unwrap();

        assert_eq!(names(&a), vec!["a", "b", "c", "d"]);
        assert_eq!(names(&a), names(&a));

        let pro = a.pro().unwrap();
        assert_eq!(pro.get(a.id()), Some(0));
        assert!(pro.get(d.id()) > pro.get(b.id()));
        assert!(pro.get(d.id()) > pro.get(c.id()));
    }

    #[test]
    fn linearize_succeeds_on_layered_hierarchy() {
        let o = Container::new("o");
        let [a, b, c, d, e] = ["a", "b", "c", "d", "e"].map(Container::new);
        for x in [&a, &b, &c, &d, &e] {
            x.extend([&o]).unwrap();
        }
        let k1 = Container::new("k1");
        let k2 = Container::new("k2");
        let k3 = Container::new("k3");
        k1.extend([&a, &b, &c]).unwrap();
        k2.extend([&d, &b, &e]).unwrap();
        k3.extend([&d, &a]).unwrap();
        let z = Container::new("z");
        z.extend([&k1, &k2, &k3]).unwrap();

        assert_eq!(
            names(&z),
            vec!["z", "k1", "k2", "k3", "d", "a", "b", "c", "e", "o"]
        );
    }

    #[test]
    fn linearize_fails_when_orders_conflict() {
        let x = Container::new("x");
        let y = Container::new("y");
        let xy = Container::new("xy");
        let yx = Container::new("yx");
        xy.extend([&x, &y]).unwrap();
        yx.extend([&y, &x]).unwrap();

        let z = Container::new("z");
        z.extend([&xy, &yx]).unwrap();
        assert!(matches!(z.pro(), Err(ProError::Inconsistent { .. })));
    }

    #[test]
    fn linearize_fails_when_bases_are_cyclic() {
        let a = Container::new("a");
        let b = Container::new("b");
        a.extend([&b]).unwrap();
        b.extend([&a]).unwrap();

        assert!(matches!(a.pro(), Err(ProError::Cyclic { .. })));
    }
}
