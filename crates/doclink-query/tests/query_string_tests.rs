//! Query-string building integration tests

use std::collections::{BTreeMap, HashMap};

use doclink_query::{append_query, escape_string, query_string, QueryError};
use rstest::rstest;
use serde_json::json;

// === query_string ===

#[test]
fn test_empty_mapping_gives_empty_string() {
    let empty: BTreeMap<String, String> = BTreeMap::new();
    assert_eq!(query_string(&empty).unwrap(), "");
}

#[test]
fn test_space_is_percent_encoded() {
    let params = json!({"q": "a b"});
    assert_eq!(query_string(params.as_object().unwrap()).unwrap(), "q=a%20b");
}

#[test]
fn test_string_and_number_joined() {
    let params = json!({"k": "v", "n": 42});
    let query = query_string(params.as_object().unwrap()).unwrap();
    assert_eq!(query, "k=v&n=42");
}

#[test]
fn test_hash_map_contains_every_pair() {
    let mut params = HashMap::new();
    params.insert("k", json!("v"));
    params.insert("n", json!(42));
    let query = query_string(&params).unwrap();
    let mut parts: Vec<&str> = query.split('&').collect();
    parts.sort();
    assert_eq!(parts, vec!["k=v", "n=42"]);
}

#[test]
fn test_booleans_and_negative_numbers() {
    let params = json!({"descending": true, "skip": -1});
    assert_eq!(
        query_string(params.as_object().unwrap()).unwrap(),
        "descending=true&skip=-1"
    );
}

#[test]
fn test_vec_of_pairs_keeps_order() {
    let params = vec![("startkey", "\"b\""), ("endkey", "\"a\"")];
    assert_eq!(
        query_string(params).unwrap(),
        "startkey=%22b%22&endkey=%22a%22"
    );
}

#[rstest]
#[case(json!(null), "null")]
#[case(json!([1, 2]), "array")]
#[case(json!({"nested": 1}), "object")]
fn test_structured_values_rejected(#[case] value: serde_json::Value, #[case] kind: &str) {
    let err = query_string([("key", value)]).unwrap_err();
    match err {
        QueryError::InvalidArgument { key, reason } => {
            assert_eq!(key, "key");
            assert!(reason.contains(kind));
        }
        other => panic!("unexpected error: {other}"),
    }
}

// === escape_string ===

#[rstest]
#[case("a&b=c", "a%26b%3Dc")]
#[case("a b", "a%20b")]
#[case("what?", "what%3F")]
#[case("path/to", "path%2Fto")]
#[case("1+1", "1%2B1")]
#[case("100%", "100%25")]
#[case("#tag", "%23tag")]
#[case("café", "caf%C3%A9")]
fn test_reserved_characters_encoded(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(escape_string(input), expected);
}

#[rstest]
#[case("plain")]
#[case("A-Z_0.9~")]
#[case("")]
fn test_unreserved_passes_through(#[case] input: &str) {
    assert_eq!(escape_string(input), input);
}

// === append_query ===

#[rstest]
#[case("http://localhost:5984/db/_all_docs", "http://localhost:5984/db/_all_docs?limit=10")]
#[case("http://localhost:5984/db/_changes?feed=longpoll", "http://localhost:5984/db/_changes?feed=longpoll&limit=10")]
#[case("http://localhost:5984/db/_all_docs?", "http://localhost:5984/db/_all_docs?limit=10")]
#[case("http://localhost:5984/db/_all_docs?a=1&", "http://localhost:5984/db/_all_docs?a=1&limit=10")]
#[case("http://h/db/_all_docs#top", "http://h/db/_all_docs?limit=10#top")]
#[case("http://h/db#a?b", "http://h/db?limit=10#a?b")]
#[case("http://h/db?feed=continuous#a", "http://h/db?feed=continuous&limit=10#a")]
fn test_append_query(#[case] url: &str, #[case] expected: &str) {
    assert_eq!(append_query(url, [("limit", 10)]).unwrap(), expected);
}

#[test]
fn test_append_empty_query_leaves_url() {
    let none: Vec<(&str, &str)> = Vec::new();
    assert_eq!(
        append_query("http://localhost/db", none).unwrap(),
        "http://localhost/db"
    );
}

#[test]
fn test_append_keeps_percent_encoding() {
    assert_eq!(
        append_query("http://h/db", [("q", "a b+c")]).unwrap(),
        "http://h/db?q=a%20b%2Bc"
    );
}

#[test]
fn test_append_to_invalid_url_fails() {
    let err = append_query("not a url", [("limit", 10)]).unwrap_err();
    assert!(matches!(err, QueryError::InvalidUrl(_)));
}
