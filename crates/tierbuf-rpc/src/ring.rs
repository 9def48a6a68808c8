//! Ring arithmetic over node ids.
//!
//! Nodes are numbered 1..N and arranged in a ring for neighborhood queries:
//! walking past N wraps to 1 and walking below 1 wraps to N. Node 0 is not a
//! valid position.

/// The node `offset` steps around the ring from `node_id`. `offset` must be
/// in [-1, 1] scaled by at most one full lap; the callers only ever step by
/// one.
#[must_use]
pub fn relative_node_id(node_id: u32, num_nodes: u32, offset: i32) -> u32 {
    let result = i64::from(node_id) + i64::from(offset);
    debug_assert!(result >= 0);
    debug_assert!(result <= i64::from(num_nodes) + 1);

    if result > i64::from(num_nodes) {
        1
    } else if result == 0 {
        num_nodes
    } else {
        result as u32
    }
}

/// The next node around the ring.
#[must_use]
pub fn next_node(node_id: u32, num_nodes: u32) -> u32 {
    relative_node_id(node_id, num_nodes, 1)
}

/// The previous node around the ring.
#[must_use]
pub fn previous_node(node_id: u32, num_nodes: u32) -> u32 {
    relative_node_id(node_id, num_nodes, -1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_wraps_to_one() {
        assert_eq!(next_node(1, 3), 2);
        assert_eq!(next_node(2, 3), 3);
        assert_eq!(next_node(3, 3), 1);
        assert_eq!(next_node(1, 1), 1);
    }

    #[test]
    fn test_previous_wraps_to_last() {
        assert_eq!(previous_node(3, 3), 2);
        assert_eq!(previous_node(2, 3), 1);
        assert_eq!(previous_node(1, 3), 3);
        assert_eq!(previous_node(1, 1), 1);
    }

    #[test]
    fn test_ring_laws_hold_for_every_position() {
        for n in 1..=8u32 {
            for k in 1..=n {
                assert_eq!(next_node(k, n), k % n + 1);
                assert_eq!(previous_node(k, n), if k == 1 { n } else { k - 1 });
            }
        }
    }
}
