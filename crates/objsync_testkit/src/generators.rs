//! Property-based test generators using proptest.

use objsync_model::{Integrity, TypeInfo};
use proptest::prelude::*;

/// Strategy for a permutation of `0..n` with `n` in `1..=max_len`.
///
/// Feed the result to [`crate::put_chain`] to get a forward-reference chain
/// of depth `n` in random presentation order.
pub fn chain_order_strategy(max_len: usize) -> impl Strategy<Value = Vec<usize>> {
    (1..=max_len.max(1)).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
}

/// Strategy for a dependency integrity kind usable on a plain type.
pub fn integrity_strategy() -> impl Strategy<Value = Integrity> {
    prop_oneof![
        Just(Integrity::Required),
        Just(Integrity::NotRequired),
        Just(Integrity::RequiredHasDefault),
    ]
}

/// Strategy for a schema of `t0..tn` with random references between them.
///
/// Self references and cycles are allowed.
pub fn reference_graph_strategy(max_types: usize) -> impl Strategy<Value = Vec<TypeInfo>> {
    (1..=max_types.max(1)).prop_flat_map(|n| {
        prop::collection::vec((0..n, 0..n, integrity_strategy()), 0..n * 3).prop_map(
            move |edges| {
                let mut types: Vec<TypeInfo> = (0..n).map(|i| TypeInfo::new(type_name(i))).collect();
                for (k, (from, to, integrity)) in edges.into_iter().enumerate() {
                    let info = std::mem::replace(&mut types[from], TypeInfo::new(""));
                    types[from] = info.with_reference(format!("ref{k}_id"), type_name(to), integrity);
                }
                types
            },
        )
    })
}

/// Name of the i-th generated type.
pub fn type_name(index: usize) -> String {
    format!("t{index}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use objsync_model::SchemaRegistry;

    proptest! {
        #[test]
        fn chain_orders_are_permutations(order in chain_order_strategy(8)) {
            let mut sorted = order.clone();
            sorted.sort_unstable();
            prop_assert_eq!(sorted, (0..order.len()).collect::<Vec<_>>());
        }

        #[test]
        fn generated_graphs_are_valid_schemas(types in reference_graph_strategy(5)) {
            prop_assert!(SchemaRegistry::new(types).is_ok());
        }
    }
}
