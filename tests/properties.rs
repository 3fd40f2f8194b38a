use jira_csv_reconcile::{
    classify::Classifier,
    config::MigrationConfig,
    correction::Unattended,
    dataset::Dataset,
    predicates::PredicateRegistry,
    reconcile::{Reconciler, reconcile},
    split::{
        Resolution, Splitter, encode_fields, escape_delimiter, fragment_count,
        unescape_delimiter,
    },
    users::{REMAP_USER, build_user_table},
};
use proptest::prelude::*;

fn schema(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

fn comment_strategy() -> impl Strategy<Value = (String, String, String)> {
    (
        "2024-0[1-9]-1[0-9] 1[0-9]:[0-5][0-9]",
        "[a-z][a-z0-9.]{0,7}",
        "[A-Za-z ;]{0,24}",
    )
}

proptest! {
    #[test]
    fn escaping_round_trips(value in "[A-Za-z0-9 ;,.]{0,24}") {
        let escaped = escape_delimiter(&value);
        prop_assert!(!escaped.contains(';'));
        prop_assert_eq!(&*unescape_delimiter(&escaped), value.as_str());
    }

    #[test]
    fn clean_cells_split_back_into_their_fields(
        values in proptest::collection::vec("[A-Za-z0-9 :.]{0,12}", 1..6)
    ) {
        let registry = PredicateRegistry::empty();
        let splitter = Splitter::new(&registry, "Unknown");
        let fields = (0..values.len()).map(|i| format!("f{i}")).collect::<Vec<_>>();
        let raw = encode_fields(&values);
        let decoded = splitter.decode(&raw, &fields).unwrap();
        prop_assert_eq!(decoded.resolution, Resolution::Clean);
        prop_assert_eq!(&decoded.values, &values);
        prop_assert_eq!(decoded.encode(), raw);
    }

    #[test]
    fn decoded_cells_always_match_schema_arity(
        fragments in proptest::collection::vec("[a-z0-9 ]{0,6}", 1..7)
    ) {
        let registry = PredicateRegistry::standard();
        let splitter = Splitter::new(&registry, "Unknown");
        let fields = schema(&["username", "comment"]);
        let raw = fragments.join(";");
        if let Ok(decoded) = splitter.decode(&raw, &fields) {
            prop_assert_eq!(decoded.values.len(), fields.len());
            prop_assert_eq!(fragment_count(&decoded.encode()), fields.len());
            if decoded.resolution != Resolution::Repaired {
                prop_assert_eq!(decoded.values.join(";"), raw);
            }
        }
    }

    #[test]
    fn reconciled_comments_are_stable_and_lossless(
        comments in proptest::collection::vec(comment_strategy(), 1..8)
    ) {
        let config = MigrationConfig::default();
        let classifier = Classifier::new(&config);
        let rows = comments
            .iter()
            .enumerate()
            .map(|(i, (when, who, text))| {
                vec![format!("MIG-{i}"), format!("{when};{who};{text}")]
            })
            .collect::<Vec<_>>();
        let data = Dataset::new(schema(&["Issue key", "Comment"]), rows).unwrap();

        let (once, report) = reconcile(data, &config, &classifier, &mut Unattended);
        prop_assert!(report.invalid.is_empty());

        let registry = PredicateRegistry::standard();
        let reconciler = Reconciler::new(&config, &classifier, &registry);
        prop_assert!(reconciler.pending(&once).is_empty());

        let splitter = Splitter::new(&registry, &config.unknown_user);
        let fields = config.schema("comment").unwrap();
        for (row, (_, who, text)) in comments.iter().enumerate() {
            let cell = once.cell(row, 1).unwrap();
            let decoded = splitter.decode(cell, fields).unwrap();
            let record = splitter.record(&decoded, fields);
            prop_assert_eq!(record.get("username"), Some(who.as_str()));
            prop_assert_eq!(record.get("comment").unwrap_or_default(), text.as_str());
        }

        let snapshot = once.rows().to_vec();
        let (twice, second) = reconciler.run(once, &mut Unattended);
        prop_assert!(second.corrections.is_empty());
        prop_assert!(!twice.is_modified());
        prop_assert_eq!(twice.rows(), snapshot.as_slice());
    }

    #[test]
    fn user_table_is_sorted_unique_with_sentinel_last(
        pairs in proptest::collection::vec(("[a-cA-C]{0,2}", "[a-cA-C]{0,2}"), 0..12)
    ) {
        let config = MigrationConfig::default();
        let classifier = Classifier::new(&config);
        let rows = pairs
            .iter()
            .enumerate()
            .map(|(i, (a, r))| vec![format!("MIG-{i}"), a.clone(), r.clone()])
            .collect::<Vec<_>>();
        let data = Dataset::new(schema(&["Issue key", "Assignee", "Reporter"]), rows).unwrap();

        let table = build_user_table(&data, &config, &classifier);
        let (last, users) = table.entries.split_last().unwrap();
        prop_assert_eq!(last.username.as_str(), REMAP_USER);
        prop_assert!(users.windows(2).all(|w| w[0].username < w[1].username));

        let mut expected = pairs
            .iter()
            .flat_map(|(a, r)| [a.clone(), r.clone()])
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>();
        expected.sort();
        expected.dedup();
        let actual = users.iter().map(|u| u.username.clone()).collect::<Vec<_>>();
        prop_assert_eq!(actual, expected);
    }
}
