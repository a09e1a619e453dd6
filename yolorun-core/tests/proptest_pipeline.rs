//! Property-based tests for run naming, classification and option rendering.

use proptest::prelude::*;
use std::path::PathBuf;

use yolorun_core::options::TrainingOptions;
use yolorun_core::{Classification, RunIdentity, classify};

// --- Run identity properties ---

proptest! {
    #[test]
    fn identity_ignores_directory_and_extension(
        model in "[a-z][a-z0-9_]{0,12}",
        dataset in "[a-z][a-z0-9_]{0,12}",
        dir_a in "[a-z]{1,8}",
        dir_b in "[a-z]{1,8}",
        ext in "(yaml|yml)",
    ) {
        let near = RunIdentity::derive(
            &PathBuf::from(format!("{model}.yaml")),
            &PathBuf::from(format!("{dataset}.yaml")),
        );
        let far = RunIdentity::derive(
            &PathBuf::from(format!("/{dir_a}/{model}.{ext}")),
            &PathBuf::from(format!("{dir_b}/{dataset}.{ext}")),
        );
        prop_assert_eq!(near.as_str(), format!("{model}_{dataset}"));
        prop_assert_eq!(near, far);
    }

    #[test]
    fn results_dir_is_child_of_root(
        model in "[a-z]{1,10}",
        dataset in "[a-z]{1,10}",
    ) {
        let root = PathBuf::from("/app/results");
        let run = RunIdentity::derive(
            &PathBuf::from(format!("{model}.yaml")),
            &PathBuf::from(format!("{dataset}.yaml")),
        );
        let dir = run.results_dir(&root);
        prop_assert_eq!(dir.parent(), Some(root.as_path()));
        prop_assert_eq!(dir.file_name().and_then(|n| n.to_str()), Some(run.as_str()));
    }
}

// --- Classification properties ---

proptest! {
    #[test]
    fn names_without_marker_are_untagged(name in "[a-rA-Ru-zU-Z0-9_]{0,24}") {
        // No 't' in the alphabet, so neither marker can appear.
        prop_assert_eq!(classify(&name), Classification::Untagged);
    }

    #[test]
    fn embedded_marker_is_tagged(
        prefix in "[a-z0-9_]{0,10}",
        suffix in "[a-z0-9_]{0,10}",
        upper in any::<bool>(),
    ) {
        let marker = if upper { "Test" } else { "test" };
        let name = format!("{prefix}{marker}{suffix}");
        prop_assert_eq!(classify(&name), Classification::Tagged);
    }
}

// --- Training option properties ---

proptest! {
    #[test]
    fn positive_epochs_render_as_first_argument(epochs in 1u32..10_000) {
        let mapping: serde_yaml::Mapping =
            serde_yaml::from_str(&format!("epochs: {epochs}\ncos_lr: true\n")).unwrap();
        let options = TrainingOptions::from_mapping(mapping).unwrap();
        let args = options.to_args();
        prop_assert_eq!(&args[0], &format!("epochs={epochs}"));
        prop_assert!(args.contains(&"cos_lr=True".to_string()));
    }
}
