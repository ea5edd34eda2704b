//! Property tests over random edit sequences

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::Fixture;
use proptest::prelude::*;
use unitas_core::{PrimaryKey, Value};

#[derive(Debug, Clone)]
enum Edit {
    Rename(usize, String),
    Reprice(usize, f64),
    Remove(usize),
}

fn edit(products: usize) -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0..products, "[a-z]{1,8}").prop_map(|(i, n)| Edit::Rename(i, n)),
        (0..products, 0.0f64..100.0).prop_map(|(i, p)| Edit::Reprice(i, p)),
        (0..products).prop_map(Edit::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_flush_makes_storage_match_memory(edits in prop::collection::vec(edit(4), 0..12)) {
        let fx = Fixture::new();
        let ids: Vec<i64> = (0..4).map(|i| fx.seed_product(&format!("p{}", i), None)).collect();
        let mut uow = fx.scope();
        let handles: Vec<_> = ids.iter().map(|id| uow.find("Product", *id).unwrap()).collect();
        let mut removed = vec![false; ids.len()];

        for edit in &edits {
            match edit {
                Edit::Rename(i, name) if !removed[*i] => uow.set(handles[*i], "name", name.as_str()).unwrap(),
                Edit::Reprice(i, price) if !removed[*i] => uow.set(handles[*i], "price", *price).unwrap(),
                Edit::Remove(i) => {
                    uow.remove(handles[*i]).unwrap();
                    removed[*i] = true;
                }
                _ => {}
            }
        }

        uow.flush().unwrap();

        // a second flush has nothing to do
        prop_assert!(!uow.is_dirty());
        prop_assert!(uow.flush().unwrap().is_empty());

        for (i, id) in ids.iter().enumerate() {
            let row = fx.db.row("product", &PrimaryKey::from(*id));
            if removed[i] {
                prop_assert!(row.is_none());
                continue;
            }
            let row = row.unwrap();
            prop_assert_eq!(row.get("name").cloned(), Some(uow.get(handles[i], "name").unwrap()));
            prop_assert_eq!(row.get("price").cloned(), Some(uow.get(handles[i], "price").unwrap()));
            prop_assert_eq!(row.get("version").cloned(), Some(uow.get(handles[i], "version").unwrap()));
        }
    }

    #[test]
    fn prop_lookups_share_one_instance(keys in prop::collection::vec(0usize..3, 1..20)) {
        let fx = Fixture::new();
        let ids: Vec<i64> = (0..3).map(|i| fx.seed_product(&format!("p{}", i), None)).collect();
        let mut uow = fx.scope();
        let mut seen = std::collections::HashMap::new();

        for (n, k) in keys.iter().enumerate() {
            let handle = if n % 2 == 0 {
                uow.find("Product", ids[*k]).unwrap()
            } else {
                uow.get_reference("Product", ids[*k]).unwrap()
            };
            let first = *seen.entry(*k).or_insert(handle);
            prop_assert_eq!(first, handle);
        }
        prop_assert_eq!(uow.stats().identity_map_entries, seen.len());
        prop_assert!(uow.backend().probe().reads() <= seen.len());
        prop_assert_eq!(uow.get(seen[&keys[0]], "name").unwrap(), Value::from(format!("p{}", keys[0])));
    }
}
