//! Property-based tests for argument handling and unit identity.

use std::path::{Path, PathBuf};

use crossrun::cli::{Mode, parse_mode};
use crossrun::discovery::identity;
use crossrun_core::filter::FilterAction;
use crossrun_core::unit::sanitize_id;
use proptest::prelude::*;

fn rule() -> impl Strategy<Value = (FilterAction, String)> {
    (prop_oneof![Just(FilterAction::Include), Just(FilterAction::Exclude)], "[a-z_]{1,8}")
}

proptest! {
    #[test]
    fn filters_keep_command_line_order(rules in prop::collection::vec(rule(), 0..8)) {
        let mut args = vec!["crossrun".to_string()];
        for (action, pattern) in &rules {
            let flag = match action {
                FilterAction::Include => "-i",
                FilterAction::Exclude => "-e",
            };
            args.push(flag.to_string());
            args.push(pattern.clone());
        }
        let Ok(Mode::Run(request)) = parse_mode(args) else {
            return Err(TestCaseError::fail("expected a run"));
        };
        prop_assert_eq!(request.filters, rules);
    }

    #[test]
    fn identity_is_the_relative_path(segments in prop::collection::vec("[a-z0-9_]{1,8}", 1..5)) {
        let base = Path::new("/tree");
        let path: PathBuf = segments.iter().fold(base.to_path_buf(), |p, s| p.join(s));
        let id = identity(&path, base);
        prop_assert_eq!(&id, &segments.join("/"));
        prop_assert!(!sanitize_id(&id).contains('/'));
    }
}
