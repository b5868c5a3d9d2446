//! Strongly connected components (Tarjan), iterative.

const UNVISITED: usize = usize::MAX;

/// Components of the graph given as adjacency lists over `0..n`, in
/// topological order: every edge goes from a component to itself or to a
/// later one. Nodes within a component are sorted.
#[must_use]
pub fn topological_components(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adjacency.len();
    let mut index = vec![UNVISITED; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut components = Vec::new();
    let mut next_index = 0usize;
    let mut frames: Vec<(usize, usize)> = Vec::new();

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        frames.push((root, 0));

        while let Some(frame) = frames.last_mut() {
            let v = frame.0;
            if frame.1 == 0 && index[v] == UNVISITED {
                index[v] = next_index;
                low[v] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack[v] = true;
            }

            if let Some(&w) = adjacency[v].get(frame.1) {
                frame.1 += 1;
                if index[w] == UNVISITED {
                    frames.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                low[parent] = low[parent].min(low[v]);
            }
            if low[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                component.sort_unstable();
                components.push(component);
            }
        }
    }

    // Tarjan emits sinks first.
    components.reverse();
    components
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position_of(components: &[Vec<usize>], node: usize) -> usize {
        components.iter().position(|c| c.contains(&node)).unwrap()
    }

    #[test]
    fn chain_is_ordered() {
        let adj = vec![vec![1], vec![2], vec![]];
        assert_eq!(topological_components(&adj), vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn cycle_is_one_component() {
        // 0 -> 1 -> 2 -> 1, 2 -> 3
        let adj = vec![vec![1], vec![2], vec![1, 3], vec![]];
        let comps = topological_components(&adj);
        assert_eq!(comps.len(), 3);
        assert!(comps.contains(&vec![1, 2]));
        assert!(position_of(&comps, 0) < position_of(&comps, 1));
        assert!(position_of(&comps, 1) < position_of(&comps, 3));
    }

    #[test]
    fn edges_never_point_backwards() {
        let adj = vec![
            vec![3],
            vec![0, 4],
            vec![1],
            vec![5],
            vec![2, 5],
            vec![3],
            vec![],
        ];
        let comps = topological_components(&adj);
        let total: usize = comps.iter().map(Vec::len).sum();
        assert_eq!(total, adj.len());
        for (u, targets) in adj.iter().enumerate() {
            for &v in targets {
                assert!(position_of(&comps, u) <= position_of(&comps, v), "{u} -> {v}");
            }
        }
    }

    #[test]
    fn deep_chain_does_not_overflow() {
        let n = 100_000;
        let adj: Vec<Vec<usize>> = (0..n).map(|i| if i + 1 < n { vec![i + 1] } else { vec![] }).collect();
        let comps = topological_components(&adj);
        assert_eq!(comps.len(), n);
        assert_eq!(comps[0], vec![0]);
    }
}
