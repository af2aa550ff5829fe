//! Property-based tests using proptest
//!
//! These tests verify the pure helpers behind the snippets: URL building,
//! SSH key metadata edits, input parsing and validation, using randomized
//! inputs.

use gcpsnip::gcp::auth::validate_project_id;
use gcpsnip::gcp::client::{region_of_zone, short_name, with_query};
use gcpsnip::gcp::pagination::extract_items;
use gcpsnip::snippets::compute::{merge_ssh_key, remove_ssh_key_entry, remove_ssh_keys_for, ssh_key_entry};
use gcpsnip::snippets::pubsub::parse_attributes;
use gcpsnip::snippets::storage::parse_gcs_uri;
use proptest::prelude::*;
use serde_json::{json, Value};

/// Generate `user:key` lines as found in project ssh-keys metadata
fn arb_ssh_line() -> impl Strategy<Value = String> {
    (
        "[a-z][a-z0-9_]{0,15}",
        prop_oneof!["ssh-rsa", "ssh-ed25519", "ecdsa-sha2-nistp256"],
        "[A-Za-z0-9+/]{8,40}",
    )
        .prop_map(|(user, kind, key)| format!("{}:{} {} {}@host", user, kind, key, user))
}

fn arb_ssh_keys() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_ssh_line(), 0..6).prop_map(|lines| lines.join("\n"))
}

mod url_tests {
    use super::*;

    proptest! {
        /// Region is the zone without its last letter suffix
        #[test]
        fn region_strips_zone_suffix(
            area in "[a-z]{2,12}",
            direction in "[a-z]{3,9}",
            index in 1u8..10,
            letter in "[a-f]",
        ) {
            let region = format!("{}-{}{}", area, direction, index);
            let zone = format!("{}-{}", region, letter);
            prop_assert_eq!(region_of_zone(&zone), region.clone());
            // a region maps to itself
            prop_assert_eq!(region_of_zone(&region), region);
        }

        /// Empty query values never show up in the URL
        #[test]
        fn with_query_skips_empty_values(key in "[a-z]{1,10}") {
            let base = "https://example.com/v1/items";
            prop_assert_eq!(with_query(base, &[(key.as_str(), "")]), base);
        }

        /// Encoded values survive a parse through the url crate
        #[test]
        fn with_query_values_round_trip(value in "[ -~]{1,40}") {
            let built = with_query("https://example.com/v1/items?alt=json", &[("filter", value.as_str())]);
            let parsed = url::Url::parse(&built).unwrap();
            let pairs: Vec<(String, String)> = parsed
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            prop_assert_eq!(pairs.len(), 2);
            prop_assert_eq!(&pairs[0], &("alt".to_string(), "json".to_string()));
            prop_assert_eq!(&pairs[1], &("filter".to_string(), value));
        }

        /// short_name returns the last path segment
        #[test]
        fn short_name_is_last_segment(
            segments in prop::collection::vec("[a-z0-9-]{1,12}", 1..6),
        ) {
            let url = format!("https://compute.googleapis.com/{}", segments.join("/"));
            prop_assert_eq!(short_name(&url), segments.last().unwrap().as_str());
        }
    }
}

mod ssh_key_tests {
    use super::*;

    proptest! {
        /// Adding a key twice changes nothing the second time
        #[test]
        fn merge_is_idempotent(existing in arb_ssh_keys(), key in "[A-Za-z0-9]{10,30}") {
            let public_key = format!("ssh-ed25519 {} newuser@host", key);
            let merged = merge_ssh_key(&existing, "newuser", &public_key).unwrap();
            prop_assert!(merge_ssh_key(&merged, "newuser", &public_key).is_none());
        }

        /// Merging keeps every existing line
        #[test]
        fn merge_preserves_other_keys(existing in arb_ssh_keys(), key in "[A-Za-z0-9]{10,30}") {
            let public_key = format!("ssh-ed25519 {}", key);
            let merged = merge_ssh_key(&existing, "newuser", &public_key).unwrap();
            for line in existing.lines() {
                prop_assert!(merged.lines().any(|l| l == line));
            }
            prop_assert_eq!(merged.lines().count(), existing.lines().count() + 1);
        }

        /// Add then remove leaves no line for that user
        #[test]
        fn remove_after_merge(existing in arb_ssh_keys(), key in "[A-Za-z0-9]{10,30}") {
            let merged = merge_ssh_key(&existing, "zz-added", &format!("ssh-rsa {}", key)).unwrap();
            let removed = remove_ssh_keys_for(&merged, "zz-added").unwrap();
            prop_assert!(!removed.lines().any(|l| l.starts_with("zz-added:")));
            prop_assert_eq!(removed.lines().count(), existing.lines().count());
        }

        /// Removing the added entry restores the other lines, same user included
        #[test]
        fn remove_entry_after_merge(existing in arb_ssh_keys(), key in "[A-Za-z0-9]{10,30}") {
            let user = existing
                .lines()
                .next()
                .and_then(|l| l.split(':').next())
                .unwrap_or("alice")
                .to_string();
            let public_key = format!("ssh-ed25519 {}NEW", key);
            let merged = merge_ssh_key(&existing, &user, &public_key).unwrap();
            let removed = remove_ssh_key_entry(&merged, &ssh_key_entry(&user, &public_key)).unwrap();
            prop_assert_eq!(removed.lines().collect::<Vec<_>>(), existing.lines().collect::<Vec<_>>());
        }

        /// Removing an absent user is a no-op
        #[test]
        fn remove_absent_user(existing in arb_ssh_keys()) {
            prop_assert!(remove_ssh_keys_for(&existing, "ZZ-not-a-user").is_none());
        }
    }
}

mod parsing_tests {
    use super::*;

    proptest! {
        /// gs:// URIs split at the first slash after the bucket
        #[test]
        fn gcs_uri_split(
            bucket in "[a-z0-9][a-z0-9_.-]{2,20}",
            object in "[a-zA-Z0-9_./-]{1,40}",
        ) {
            let uri = format!("gs://{}/{}", bucket, object);
            let (b, o) = parse_gcs_uri(&uri).unwrap();
            prop_assert_eq!(b, bucket.as_str());
            prop_assert_eq!(o, object.as_str());
        }

        /// Non-gs URIs are rejected
        #[test]
        fn non_gcs_uri_rejected(path in "[a-z0-9/]{1,30}") {
            let uri = format!("https://{}", path);
            prop_assert!(parse_gcs_uri(&uri).is_none());
        }

        /// key=value pairs parse; values may contain '='
        #[test]
        fn attributes_parse(
            pairs in prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9=]{0,10}", 0..5),
        ) {
            let args: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            let parsed = parse_attributes(&args).unwrap();
            prop_assert_eq!(parsed, pairs);
        }

        /// An argument without '=' is an error
        #[test]
        fn attribute_without_equals_rejected(arg in "[a-z]{1,10}") {
            prop_assert!(parse_attributes(&[arg]).is_err());
        }

        /// Items are found under dotted paths, missing paths are empty
        #[test]
        fn extract_items_dotted(items in prop::collection::vec("[a-z]{1,8}", 0..10)) {
            let list: Vec<Value> = items.iter().map(|s| json!({ "name": s })).collect();
            let response = json!({ "result": { "items": list } });
            prop_assert_eq!(extract_items(&response, "result.items").len(), items.len());
            prop_assert!(extract_items(&response, "result.missing").is_empty());
        }
    }
}

mod validation_tests {
    use super::*;

    proptest! {
        /// Valid project IDs are accepted
        #[test]
        fn valid_project_ids_accepted(
            first in "[a-z]",
            middle in "[a-z0-9-]{4,27}",
            last in "[a-z0-9]",
        ) {
            let project_id = format!("{}{}{}", first, middle, last);
            prop_assert!(validate_project_id(&project_id));
        }

        /// Project IDs starting with a digit are rejected
        #[test]
        fn numeric_start_rejected(first in "[0-9]", rest in "[a-z0-9-]{5,20}") {
            let project_id = format!("{}{}", first, rest);
            prop_assert!(!validate_project_id(&project_id));
        }

        /// Too short or too long IDs are rejected
        #[test]
        fn length_bounds(short in "[a-z]{1,5}", long in "[a-z]{31,40}") {
            prop_assert!(!validate_project_id(&short));
            prop_assert!(!validate_project_id(&long));
        }

        /// Uppercase letters are rejected
        #[test]
        fn uppercase_rejected(prefix in "[a-z]{3,10}", upper in "[A-Z]{1,5}") {
            let project_id = format!("{}{}", prefix, upper);
            prop_assert!(!validate_project_id(&project_id));
        }
    }
}
