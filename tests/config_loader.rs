mod util;

use hdd_dispatch::config::{Configuration, DEFAULT_GRID_REFINEMENTS, GRID_REFINEMENTS_KEY};
use hdd_dispatch::DispatchError;
use proptest::prelude::*;
use util::{MISSING_CONFIG, args, write_config};

#[test]
fn missing_file_falls_back_to_default() {
    let cfg = Configuration::load_or_default(MISSING_CONFIG, &[]).unwrap();
    assert_eq!(cfg.get_int(GRID_REFINEMENTS_KEY).unwrap(), 2);
    assert_eq!(cfg.len(), 1);
    assert_eq!(cfg, Configuration::fallback());
}

#[test]
fn unreadable_path_falls_back_to_default() {
    // a directory cannot be read as a file
    let dir = tempfile::tempdir().unwrap();
    let cfg = Configuration::load_or_default(dir.path(), &[]).unwrap();
    assert_eq!(cfg.get_usize(GRID_REFINEMENTS_KEY).unwrap(), DEFAULT_GRID_REFINEMENTS);
}

#[test]
fn overrides_apply_on_top_of_the_fallback() {
    let cfg = Configuration::load_or_default(
        MISSING_CONFIG,
        &args(&["-grids.refinements", "4", "--solver.type=jacobi_cg"]),
    )
    .unwrap();
    assert_eq!(cfg.get_usize(GRID_REFINEMENTS_KEY).unwrap(), 4);
    assert_eq!(cfg.get_string("solver.type").unwrap(), "jacobi_cg");
}

#[test]
fn sections_prefix_their_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        "# mpi cg example\n\
         [grids]\n\
         refinements = 3\n\
         \n\
         [solver]\n\
         type = cg     % inline comment\n\
         precision = 1e-8\n\
         bounds = [0.1 1.0]\n",
    );
    let cfg = Configuration::load_or_default(&path, &[]).unwrap();
    assert_eq!(cfg.get_int("grids.refinements").unwrap(), 3);
    assert_eq!(cfg.get_string("solver.type").unwrap(), "cg");
    assert_eq!(cfg.get_f64("solver.precision").unwrap(), 1e-8);
    assert_eq!(cfg.get_vec_f64("solver.bounds").unwrap(), vec![0.1, 1.0]);

    let solver = cfg.sub("solver");
    assert_eq!(solver.keys().collect::<Vec<_>>(), vec!["bounds", "precision", "type"]);
    assert!(!solver.has_key("grids.refinements"));
}

#[test]
fn malformed_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "[grids]\nrefinements 3\n");
    match Configuration::load_or_default(&path, &[]) {
        Err(DispatchError::ConfigParse { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn empty_section_name_is_rejected() {
    let err = Configuration::parse("a = 1\n[x]\nb = 2\n[]\n").unwrap_err();
    assert!(matches!(err, DispatchError::ConfigParse { line: 4, .. }));
}

#[test]
fn duplicate_keys_are_rejected() {
    let err = Configuration::parse("x.b = 1\n[x]\nb = 2\n").unwrap_err();
    assert!(matches!(err, DispatchError::ConfigParse { line: 3, .. }));
}

#[test]
fn typed_access_reports_bad_values() {
    let cfg = Configuration::parse("n = three\nflag = maybe\n").unwrap();
    assert!(matches!(cfg.get_int("n"), Err(DispatchError::InvalidValue { .. })));
    assert!(matches!(cfg.get_bool("flag"), Err(DispatchError::InvalidValue { .. })));
    assert!(matches!(cfg.get_int("m"), Err(DispatchError::MissingKey(_))));
    assert_eq!(cfg.get_or("m", 5i64).unwrap(), 5);
}

#[test]
fn dangling_override_is_an_error() {
    let mut cfg = Configuration::new();
    assert!(cfg.apply_args(&args(&["-grids.refinements"])).is_err());
    assert!(cfg.apply_args(&args(&["stray"])).is_err());
}

#[test]
fn report_groups_by_section() {
    let cfg = Configuration::parse("top = 1\n[solver]\ntype = cg\n[grids]\nrefinements = 2\n").unwrap();
    let report = cfg.report_string();
    let grids = report.find("[grids]").unwrap();
    let solver = report.find("[solver]").unwrap();
    assert!(grids < solver);
    assert!(report.contains("refinements = 2"));
    assert!(report.contains("top = 1"));
}

#[test]
fn configuration_is_serializable() {
    let cfg = Configuration::parse("[solver]\ntype = cg\n").unwrap();
    let json = serde_json::to_string(&cfg).unwrap();
    let back: Configuration = serde_json::from_str(&json).unwrap();
    assert_eq!(back, cfg);
}

proptest! {
    #[test]
    fn refinement_override_wins(n in 0usize..64) {
        let cfg = Configuration::load_or_default(
            MISSING_CONFIG,
            &args(&["-grids.refinements", &n.to_string()]),
        )
        .unwrap();
        prop_assert_eq!(cfg.get_usize(GRID_REFINEMENTS_KEY).unwrap(), n);
    }
}
