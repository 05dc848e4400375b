use std::collections::HashMap;

use proptest::prelude::*;

use crate::Float32Table;
use crate::Uint32Table;
use crate::Uint64Table;

/// Reference model: a map handing out dense ids in first-sight order.
#[derive(Default)]
struct Model {
    ids: HashMap<u64, i32>,
}

impl Model {
    fn probe(&mut self, key: u64) -> i32 {
        let next = self.ids.len() as i32;
        *self.ids.entry(key).or_insert(next)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Keys drawn from a narrow range collide constantly; full-range keys are
/// mostly distinct. Mixing both exercises duplicate chains and growth.
fn key_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![any::<u64>(), (0u64..64), (0u64..4096)]
}

fn batches_strategy() -> impl Strategy<Value = Vec<Vec<u64>>> {
    prop::collection::vec(prop::collection::vec(key_strategy(), 0..300), 1..6)
}

proptest! {
    #[test]
    fn u64_table_matches_model(batches in batches_strategy(), seed in any::<u64>()) {
        let mut table = Uint64Table::with_seed(0, 0.85, seed).unwrap();
        let mut model = Model::default();

        for batch in &batches {
            let mut values = vec![0i32; batch.len()];
            table.probe(batch, &mut values).unwrap();

            for (key, value) in batch.iter().zip(&values) {
                prop_assert_eq!(*value, model.probe(*key));
            }
            prop_assert_eq!(table.len(), model.len());
        }
    }

    #[test]
    fn u32_table_matches_model(batches in batches_strategy(), seed in any::<u64>()) {
        let mut table = Uint32Table::with_seed(0, 0.75, seed).unwrap();
        let mut model = Model::default();

        for batch in &batches {
            let keys: Vec<u32> = batch.iter().map(|key| *key as u32).collect();
            let mut values = vec![0i32; keys.len()];
            table.probe(&keys, &mut values).unwrap();

            for (key, value) in keys.iter().zip(&values) {
                prop_assert_eq!(*value, model.probe(u64::from(*key)));
            }
            prop_assert_eq!(table.len(), model.len());
        }
    }

    #[test]
    fn probing_a_sequence_twice_is_idempotent(keys in prop::collection::vec(key_strategy(), 1..500), seed in any::<u64>()) {
        let mut table = Uint64Table::with_seed(0, 0.8, seed).unwrap();

        let mut first = vec![0i32; keys.len()];
        table.probe(&keys, &mut first).unwrap();

        let mut second = vec![0i32; keys.len()];
        table.probe(&keys, &mut second).unwrap();

        prop_assert_eq!(first, second);
    }

    #[test]
    fn growth_does_not_change_the_mapping(keys in prop::collection::vec(key_strategy(), 1..2000)) {
        // A tiny table that grows repeatedly and a table sized for the
        // whole sequence must assign identical identifiers, regardless of
        // their unrelated seeds.
        let mut growing = Uint64Table::with_seed(0, 0.6, 1).unwrap();
        let mut sized = Uint64Table::with_seed(keys.len() * 4, 0.9, 2).unwrap();

        let mut grown_values = vec![0i32; keys.len()];
        let mut sized_values = vec![0i32; keys.len()];
        growing.probe(&keys, &mut grown_values).unwrap();
        sized.probe(&keys, &mut sized_values).unwrap();

        prop_assert_eq!(grown_values, sized_values);
        prop_assert_eq!(growing.len(), sized.len());
    }

    #[test]
    fn identifiers_form_a_bijection(keys in prop::collection::vec(key_strategy(), 1..1000), seed in any::<u64>()) {
        let mut table = Uint64Table::with_seed(0, 0.85, seed).unwrap();
        let mut values = vec![0i32; keys.len()];
        table.probe(&keys, &mut values).unwrap();

        // Every distinct key maps to exactly one identifier, and the
        // identifiers are exactly 0..len.
        let mut by_key: HashMap<u64, i32> = HashMap::new();
        for (key, value) in keys.iter().zip(&values) {
            let previous = by_key.insert(*key, *value);
            if let Some(previous) = previous {
                prop_assert_eq!(previous, *value);
            }
        }

        let mut ids: Vec<i32> = by_key.values().copied().collect();
        ids.sort_unstable();
        let expected: Vec<i32> = (0..table.len() as i32).collect();
        prop_assert_eq!(ids, expected);
    }

    #[test]
    fn reset_restarts_from_zero(keys in prop::collection::vec(key_strategy(), 1..300), seed in any::<u64>()) {
        let mut table = Uint64Table::with_seed(0, 0.75, seed).unwrap();

        let mut values = vec![0i32; keys.len()];
        table.probe(&keys, &mut values).unwrap();
        table.reset();
        prop_assert_eq!(table.len(), 0);

        table.probe(&keys, &mut values).unwrap();

        let mut model = Model::default();
        for (key, value) in keys.iter().zip(&values) {
            prop_assert_eq!(*value, model.probe(*key));
        }
    }

    #[test]
    fn float_bits_discriminate(signs in prop::collection::vec(any::<bool>(), 1..100), seed in any::<u64>()) {
        let keys: Vec<f32> = signs
            .iter()
            .map(|negative| if *negative { -0.0f32 } else { 0.0 })
            .collect();

        let mut table = Float32Table::with_seed(0, 0.75, seed).unwrap();
        let mut values = vec![0i32; keys.len()];
        table.probe(&keys, &mut values).unwrap();

        let first_sign = signs[0];
        for (sign, value) in signs.iter().zip(&values) {
            prop_assert_eq!(*value, i32::from(*sign != first_sign));
        }
    }
}
