//! Property-Based Tests for forge
//!
//! These tests verify:
//! - Append patches accumulate in declared order, never replacing content
//! - Manifest validation rejects paths that escape the template root
//! - Enum string round-trips

use proptest::prelude::*;
use std::fs;

use forge::{AppendPatch, FileMaterializer, IoMode, NullProgress, Template};
use tempfile::TempDir;

// =============================================================================
// Append Accumulation
// =============================================================================

/// Printable patch bodies, newlines included
fn patch_body_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ._*/#\n-]{0,40}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Final content is the original followed by every patch, in order
    #[test]
    fn appends_accumulate_in_order(
        original in patch_body_strategy(),
        bodies in prop::collection::vec(patch_body_strategy(), 0..6),
    ) {
        let template = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        fs::write(workspace.path().join(".gitignore"), &original).unwrap();

        let mut patches = Vec::new();
        for (i, body) in bodies.iter().enumerate() {
            let rel = format!("patches/{}.append", i);
            let path = template.path().join(&rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, body).unwrap();
            patches.push(AppendPatch::new(".gitignore", rel));
        }

        FileMaterializer::new(template.path(), workspace.path())
            .apply_appends(&patches, &mut NullProgress)
            .unwrap();

        let expected: String = std::iter::once(original.as_str())
            .chain(bodies.iter().map(String::as_str))
            .collect();
        let actual = fs::read_to_string(workspace.path().join(".gitignore")).unwrap();
        prop_assert_eq!(actual, expected);
    }

    /// Applying the same patch twice appends it twice
    #[test]
    fn repeated_patch_is_not_deduplicated(
        original in patch_body_strategy(),
        body in patch_body_strategy(),
        times in 1usize..4,
    ) {
        let template = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        fs::write(workspace.path().join("README.md"), &original).unwrap();
        fs::write(template.path().join("readme.append"), &body).unwrap();

        let patch = AppendPatch::new("README.md", "readme.append");
        let materializer = FileMaterializer::new(template.path(), workspace.path());
        for _ in 0..times {
            materializer.apply_appends(std::slice::from_ref(&patch), &mut NullProgress).unwrap();
        }

        let actual = fs::read_to_string(workspace.path().join("README.md")).unwrap();
        prop_assert_eq!(actual, format!("{}{}", original, body.repeat(times)));
    }
}

// =============================================================================
// Manifest Validation
// =============================================================================

/// Relative path segments that stay inside the root
fn segment_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}"
}

proptest! {
    /// Any copy path containing a parent-directory component is rejected
    #[test]
    fn copy_paths_with_parent_components_rejected(
        before in prop::collection::vec(segment_strategy(), 0..3),
        after in prop::collection::vec(segment_strategy(), 0..3),
    ) {
        let mut parts = before;
        parts.push("..".to_string());
        parts.extend(after);

        let mut template = Template::new("escape");
        template.files.copy.push(parts.join("/"));
        prop_assert!(template.validate().is_err());
    }

    /// Plain relative copy paths are accepted
    #[test]
    fn plain_relative_copy_paths_accepted(
        parts in prop::collection::vec(segment_strategy(), 1..4),
    ) {
        let mut template = Template::new("plain");
        template.files.copy.push(parts.join("/"));
        prop_assert!(template.validate().is_ok());
    }
}

// =============================================================================
// IoMode Enum Property Tests
// =============================================================================

fn io_mode_strategy() -> impl Strategy<Value = IoMode> {
    prop_oneof![Just(IoMode::Attached), Just(IoMode::Captured)]
}

proptest! {
    /// IoMode: to_string → parse round-trip is identity
    #[test]
    fn io_mode_roundtrip(mode in io_mode_strategy()) {
        let parsed: IoMode = mode.to_string().parse().expect("Should parse");
        prop_assert_eq!(mode, parsed);
    }
}
