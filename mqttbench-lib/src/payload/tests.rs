use std::time::{Duration, UNIX_EPOCH};

use rand::{SeedableRng as _, rngs::SmallRng};
use serde_json::json;
use tracing_test::traced_test;

use super::*;

fn rng() -> SmallRng {
    SmallRng::seed_from_u64(42)
}

fn resolve_text(input: &str) -> String {
    let out = resolve(&PayloadSpec::Text(input.to_owned()), SystemTime::now(), &mut rng());
    String::from_utf8(out).unwrap()
}

fn is_alphanumeric(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[test]
fn test_text_without_placeholders_is_unchanged() {
    for input in ["", "hello world", "$ {rand4}", "${", "{}", "price: $5 {x}", "héllo ${"] {
        let out = resolve(&PayloadSpec::Text(input.to_owned()), SystemTime::now(), &mut rng());
        assert_eq!(out, input.as_bytes(), "input: '{input}'");
    }
}

#[test]
fn test_create_ts_is_epoch_millis() {
    let now = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
    let spec = PayloadSpec::Text("ts=${createTs};again=${createTs}".to_owned());
    let out = String::from_utf8(resolve(&spec, now, &mut rng())).unwrap();
    assert_eq!(out, "ts=1700000000123;again=1700000000123");
}

#[test]
fn test_create_ts_uses_current_time() {
    let before = unix_millis(SystemTime::now());
    let out = resolve_text("${createTs}");
    let after = unix_millis(SystemTime::now());

    let ts: u128 = out.parse().expect("integer timestamp");
    assert!(before <= ts && ts <= after, "{before} <= {ts} <= {after}");
}

#[test]
fn test_rand_has_requested_length_and_alphabet() {
    for n in [0usize, 1, 4, 10, 64] {
        let out = resolve_text(&format!("${{rand{n}}}"));
        assert_eq!(out.len(), n, "n = {n}");
        assert!(is_alphanumeric(&out), "out = {out}");
    }
}

#[test]
fn test_rand_occurrences_are_resolved_independently() {
    let out = resolve_text("${rand16}-${rand16}");
    let (a, b) = out.split_once('-').unwrap();
    assert_eq!(a.len(), 16);
    assert_eq!(b.len(), 16);
    assert_ne!(a, b);
}

#[test]
fn test_rand_is_deterministic_for_a_seed() {
    let template = PayloadTemplate::compile(&PayloadSpec::Text("${rand32}".to_owned()));
    let now = SystemTime::now();
    let a = template.render(now, &mut rng());
    let b = template.render(now, &mut rng());
    assert_eq!(a, b);

    let mut shared = rng();
    let c = template.render(now, &mut shared);
    let d = template.render(now, &mut shared);
    assert_ne!(c, d);
}

#[test]
#[traced_test]
fn test_unparseable_rand_is_left_unresolved() {
    for (input, expected_literal) in [
        ("a${randx}b", "a${randx}b"),
        ("${rand}", "${rand}"),
        ("${rand-3}", "${rand-3}"),
        ("${rand+3}", "${rand+3}"),
        ("${rand4", "${rand4"),
        ("${rand99999999999999999999999}", "${rand99999999999999999999999}"),
    ] {
        assert_eq!(resolve_text(input), expected_literal, "input: '{input}'");
    }
    assert!(logs_contain("placeholder left unresolved"));
}

#[test]
fn test_scanning_continues_after_unparseable_rand() {
    let out = resolve_text("${randx}|${rand3}|${createTs}");
    let parts: Vec<_> = out.split('|').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "${randx}");
    assert_eq!(parts[1].len(), 3);
    assert!(is_alphanumeric(parts[1]));
    assert!(parts[2].parse::<u128>().is_ok());
}

#[test]
fn test_nested_placeholder_markers() {
    let out = resolve_text("${rand${rand2}}");
    assert!(out.starts_with("${rand"));
    assert!(out.ends_with('}'));
    assert_eq!(out.len(), "${rand".len() + 2 + 1);
}

#[test]
fn test_tree_object_rand_round_trip() {
    let spec = PayloadSpec::Tree(json!({"a": "${rand4}"}));
    let out = resolve(&spec, SystemTime::now(), &mut rng());

    let value: Value = serde_json::from_slice(&out).unwrap();
    let a = value["a"].as_str().unwrap();
    assert_eq!(a.len(), 4);
    assert!(is_alphanumeric(a));
}

#[test]
fn test_tree_is_resolved_recursively() {
    let now = UNIX_EPOCH + Duration::from_millis(42);
    let spec = PayloadSpec::Tree(json!({
        "createTs": "${createTs}",
        "nested": {
            "list": ["${rand5}", 1, true, null, ["${createTs}"]],
            "n": 3.5,
        },
        "plain": "text",
    }));
    let out = resolve(&spec, now, &mut rng());
    let value: Value = serde_json::from_slice(&out).unwrap();

    assert_eq!(value["createTs"], "42");
    assert_eq!(value["plain"], "text");
    assert_eq!(value["nested"]["n"], 3.5);

    let list = value["nested"]["list"].as_array().unwrap();
    assert_eq!(list.len(), 5);
    assert_eq!(list[0].as_str().unwrap().len(), 5);
    assert_eq!(list[1], 1);
    assert_eq!(list[2], true);
    assert!(list[3].is_null());
    assert_eq!(list[4], json!(["42"]));
}

#[test]
fn test_tree_array_root() {
    let spec = PayloadSpec::Tree(json!(["${rand2}", {"k": "${rand3}"}]));
    let out = resolve(&spec, SystemTime::now(), &mut rng());
    let value: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(value[0].as_str().unwrap().len(), 2);
    assert_eq!(value[1]["k"].as_str().unwrap().len(), 3);
}

#[test]
fn test_tree_without_placeholders_is_semantically_identical() {
    let input = json!({"b": [1, 2, {"c": null}], "a": "x", "d": false});
    let spec = PayloadSpec::Tree(input.clone());

    let template = PayloadTemplate::compile(&spec);
    assert!(template.is_static());

    let out = template.render(SystemTime::now(), &mut rng());
    let value: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(value, input);
}

#[test]
fn test_is_static() {
    for (spec, expected) in [
        (PayloadSpec::Text("hello".to_owned()), true),
        (PayloadSpec::Text("${randx}".to_owned()), true),
        (PayloadSpec::Text("${rand1}".to_owned()), false),
        (PayloadSpec::Tree(json!({"a": ["${createTs}"]})), false),
        (PayloadSpec::Tree(json!(12)), true),
    ] {
        assert_eq!(
            PayloadTemplate::compile(&spec).is_static(),
            expected,
            "spec: {spec:?}"
        );
    }
}

#[test]
fn test_payload_spec_from_json_value() {
    assert_eq!(
        PayloadSpec::from_json_value(json!("${rand3}")),
        PayloadSpec::Text("${rand3}".to_owned())
    );
    assert_eq!(
        PayloadSpec::from_json_value(json!({"a": 1})),
        PayloadSpec::Tree(json!({"a": 1}))
    );
    assert_eq!(
        PayloadSpec::from_json_value(json!([1])),
        PayloadSpec::Tree(json!([1]))
    );
}

#[test]
#[traced_test]
fn test_oversized_rand_is_rejected() {
    let too_long = MAX_RAND_LEN + 1;
    for spec in [
        PayloadSpec::Text("${rand1099511627776000}".to_owned()),
        PayloadSpec::Text(format!("ok ${{rand4}} then ${{rand{too_long}}}")),
        PayloadSpec::Text("${rand99999999999999999999999}".to_owned()),
        PayloadSpec::Tree(json!({"a": [1, {"b": "${rand1099511627776000}"}]})),
    ] {
        assert!(
            PayloadTemplate::try_compile(&spec).is_err(),
            "spec: {spec:?}"
        );
        // lenient compile keeps it as literal text instead of allocating
        assert!(!resolve(&spec, SystemTime::now(), &mut rng()).is_empty());
    }
    assert!(logs_contain("count exceeds the maximum"));
}

#[test]
fn test_rand_up_to_max_len_compiles() {
    for spec in [
        PayloadSpec::Text(format!("${{rand{MAX_RAND_LEN}}}")),
        PayloadSpec::Text("${randx} ${rand8} ${createTs}".to_owned()),
        PayloadSpec::Tree(json!({"a": "${rand8}"})),
    ] {
        assert!(
            PayloadTemplate::try_compile(&spec).is_ok(),
            "spec: {spec:?}"
        );
    }
}
