//! Write ordering
//!
//! Orders the nodes of one commit phase so that every prerequisite comes
//! before its dependents. Ties go to the node scheduled first. A cycle is
//! broken by deferring the nullable dependencies of one of its nodes; a
//! cycle made only of non-nullable dependencies cannot be ordered.

/// `dependent` may only be written after `prerequisite`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub dependent: usize,
    pub prerequisite: usize,
    /// The dependency may be deferred by writing NULL first
    pub nullable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ordering {
    /// Node indices in write order
    pub order: Vec<usize>,
    /// Indices into the dependency list that were deferred to break cycles
    pub deferred: Vec<usize>,
}

/// Topologically order `node_count` nodes under `deps`
///
/// # Errors
///
/// Returns the nodes left unordered when they form a cycle without a
/// nullable way out.
pub fn order_nodes(node_count: usize, deps: &[Dependency]) -> Result<Ordering, Vec<usize>> {
    let mut placed = vec![false; node_count];
    let mut live = vec![true; deps.len()];
    let mut ordering = Ordering::default();

    while ordering.order.len() < node_count {
        let blocked = |node: usize, live: &[bool]| {
            deps.iter()
                .enumerate()
                .filter(|(i, d)| live[*i] && d.dependent == node && !placed[d.prerequisite])
                .map(|(i, _)| i)
                .collect::<Vec<_>>()
        };

        let ready = (0..node_count).find(|&n| !placed[n] && blocked(n, &live).is_empty());
        let next = match ready {
            Some(node) => node,
            None => {
                let breakable = (0..node_count).find(|&n| {
                    !placed[n] && blocked(n, &live).iter().all(|&i| deps[i].nullable)
                });
                let Some(node) = breakable else {
                    return Err((0..node_count).filter(|&n| !placed[n]).collect());
                };
                for i in blocked(node, &live) {
                    live[i] = false;
                    ordering.deferred.push(i);
                }
                node
            }
        };
        placed[next] = true;
        ordering.order.push(next);
    }
    Ok(ordering)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(dependent: usize, prerequisite: usize, nullable: bool) -> Dependency {
        Dependency {
            dependent,
            prerequisite,
            nullable,
        }
    }

    #[test]
    fn test_independent_nodes_keep_scheduling_order() {
        let ordering = order_nodes(3, &[]).unwrap();
        assert_eq!(ordering.order, vec![0, 1, 2]);
        assert!(ordering.deferred.is_empty());
    }

    #[test]
    fn test_prerequisite_goes_first() {
        // line (0) needs order (1) which needs customer (2)
        let ordering = order_nodes(3, &[dep(0, 1, false), dep(1, 2, false)]).unwrap();
        assert_eq!(ordering.order, vec![2, 1, 0]);
    }

    #[test]
    fn test_nullable_cycle_is_deferred() {
        // customer (0) -> address (1) nullable, address -> customer required
        let deps = [dep(0, 1, true), dep(1, 0, false)];
        let ordering = order_nodes(2, &deps).unwrap();
        assert_eq!(ordering.order, vec![0, 1]);
        assert_eq!(ordering.deferred, vec![0]);
    }

    #[test]
    fn test_required_cycle_fails() {
        let deps = [dep(0, 1, false), dep(1, 0, false), dep(2, 0, false)];
        let stuck = order_nodes(3, &deps).unwrap_err();
        assert_eq!(stuck, vec![0, 1, 2]);
    }

    #[test]
    fn test_only_cycle_edges_are_deferred() {
        // 0 <-> 1 nullable both ways, 2 depends on 0
        let deps = [dep(0, 1, true), dep(1, 0, true), dep(2, 0, false)];
        let ordering = order_nodes(3, &deps).unwrap();
        assert_eq!(ordering.order, vec![0, 1, 2]);
        assert_eq!(ordering.deferred, vec![0]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn acyclic_orders_respect_every_dependency(
                n in 1usize..12,
                raw in proptest::collection::vec((0usize..12, 0usize..12, any::<bool>()), 0..30),
            ) {
                // only edges from higher to lower index: guaranteed acyclic
                let deps: Vec<Dependency> = raw
                    .into_iter()
                    .filter(|(a, b, _)| a < &n && b < &n && a > b)
                    .map(|(a, b, nullable)| dep(a, b, nullable))
                    .collect();
                let ordering = order_nodes(n, &deps).unwrap();
                prop_assert!(ordering.deferred.is_empty());
                prop_assert_eq!(ordering.order.len(), n);
                let pos = |x: usize| ordering.order.iter().position(|&o| o == x).unwrap();
                for d in &deps {
                    prop_assert!(pos(d.prerequisite) < pos(d.dependent));
                }
            }

            #[test]
            fn nullable_graphs_always_order(
                n in 1usize..10,
                raw in proptest::collection::vec((0usize..10, 0usize..10), 0..25),
            ) {
                let deps: Vec<Dependency> = raw
                    .into_iter()
                    .filter(|(a, b)| a < &n && b < &n && a != b)
                    .map(|(a, b)| dep(a, b, true))
                    .collect();
                let ordering = order_nodes(n, &deps).unwrap();
                prop_assert_eq!(ordering.order.len(), n);
                let pos = |x: usize| ordering.order.iter().position(|&o| o == x).unwrap();
                for (i, d) in deps.iter().enumerate() {
                    if !ordering.deferred.contains(&i) {
                        prop_assert!(pos(d.prerequisite) < pos(d.dependent));
                    }
                }
            }
        }
    }
}
