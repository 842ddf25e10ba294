//! Properties of the derivative path model.
//!
//! The composition from entity tuple + descriptor + space to a path must be
//! total on legal inputs, injective (distinct inputs never collide), and
//! idempotent (same input, same path).

use proptest::prelude::*;
use spineprep_core::{func_path, Desc, RunId, Space};
use std::collections::HashSet;
use std::path::Path;

fn label() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,6}"
}

fn run_id() -> impl Strategy<Value = RunId> {
    (
        label(),
        proptest::option::of(label()),
        label(),
        proptest::option::of(label()),
        1u32..99,
    )
        .prop_map(|(subject, session, task, acquisition, run)| RunId {
            subject,
            session,
            task,
            acquisition,
            run,
        })
}

fn desc() -> impl Strategy<Value = Desc> {
    prop_oneof![
        Just(Desc::Motion),
        Just(Desc::MotionParams),
        Just(Desc::MotionParamsMeta),
        Just(Desc::Mppca),
        Just(Desc::Confounds),
        Just(Desc::ConfoundsMeta),
        Just(Desc::Crop),
        Just(Desc::Cordmask),
        Just(Desc::Wmmask),
        Just(Desc::Csfmask),
        Just(Desc::Labels),
    ]
}

fn space() -> impl Strategy<Value = Space> {
    prop_oneof![Just(Space::Native), Just(Space::Pam50)]
}

proptest! {
    #[test]
    fn composition_is_idempotent(id in run_id(), d in desc(), sp in space()) {
        let a = func_path(Path::new("/deriv"), &id, sp, d);
        let b = func_path(Path::new("/deriv"), &id, sp, d);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn distinct_tuples_never_collide(ids in proptest::collection::vec((run_id(), desc(), space()), 2..20)) {
        let mut seen = HashSet::new();
        let mut inputs = HashSet::new();
        for (id, d, sp) in &ids {
            // Two descriptors share a token but differ in extension
            // (Confounds vs ConfoundsMeta), so keyed inputs use the path
            // basics that must distinguish them.
            if inputs.insert((id.clone(), *d, *sp)) {
                let p = func_path(Path::new("/deriv"), id, *sp, *d);
                prop_assert!(seen.insert(p), "collision for {} {:?} {:?}", id, d, sp);
            }
        }
    }

    #[test]
    fn run_key_is_prefix_of_file_name(id in run_id(), d in desc()) {
        let p = func_path(Path::new("/deriv"), &id, Space::Native, d);
        let name = p.file_name().unwrap().to_string_lossy().into_owned();
        prop_assert!(name.starts_with(&id.key()));
    }
}
