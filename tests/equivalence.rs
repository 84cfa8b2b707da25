//! End-to-end equivalence scenarios
//!
//! Every test drives the full engine against a live solver and skips
//! (loudly) when no `z3` binary is on the search path.

use std::collections::BTreeMap;

use octopus::prelude::*;

fn checker(leaps: bool) -> Option<Checker> {
    if !Session::available("z3") {
        eprintln!("skipping: z3 is not on the search path");
        return None;
    }
    let specs = SolverSpec::parse_list("z3").unwrap();
    let options = CheckOptions {
        leaps,
        fallback_to_naive_on_unknown: false,
    };
    Some(Checker::open(&specs, &SolverOptions::default(), options).unwrap())
}

fn load(text: &str) -> Parser {
    Parser::from_json_str(text).unwrap()
}

fn verdicts_diverge(counterexample: &Counterexample, left: &Parser, right: &Parser) -> bool {
    let packet = counterexample.bits();
    let inits = BTreeMap::new();
    let left = replay(left, &packet, &inits);
    let right = replay(right, &packet, &inits);
    left.verdict != right.verdict
}

const FOUR_BIT_ACCEPT: &str = r#"{
    "registers": [{"name": "h", "width": 4}],
    "states": [{
        "name": "start",
        "statements": [{"kind": "extract", "register": "h"}],
        "transition": {"kind": "accept"}
    }]
}"#;

const THREE_BIT_ACCEPT: &str = r#"{
    "registers": [{"name": "h", "width": 3}],
    "states": [{
        "name": "start",
        "statements": [{"kind": "extract", "register": "h"}],
        "transition": {"kind": "accept"}
    }]
}"#;

fn disjoint_arms(first_one: bool) -> String {
    let (first, second) = if first_one {
        (r#"{"pattern": 1, "target": "a"}"#, r#"{"pattern": 0, "target": "b"}"#)
    } else {
        (r#"{"pattern": 0, "target": "b"}"#, r#"{"pattern": 1, "target": "a"}"#)
    };
    format!(
        r#"{{
            "registers": [
                {{"name": "tag", "width": 1}},
                {{"name": "x", "width": 2}},
                {{"name": "y", "width": 2}}
            ],
            "states": [
                {{
                    "name": "start",
                    "statements": [{{"kind": "extract", "register": "tag"}}],
                    "transition": {{
                        "kind": "select",
                        "scrutinees": [{{"kind": "reg", "register": "tag"}}],
                        "cases": [{first}, {second}],
                        "default": "reject"
                    }}
                }},
                {{
                    "name": "a",
                    "statements": [{{"kind": "extract", "register": "x"}}],
                    "transition": {{"kind": "accept"}}
                }},
                {{
                    "name": "b",
                    "statements": [{{"kind": "extract", "register": "y"}}],
                    "transition": {{"kind": "accept"}}
                }}
            ]
        }}"#
    )
}

fn first_match(wildcard_first: bool) -> String {
    let (first, second) = if wildcard_first {
        (r#"{"pattern": "_", "target": "accept"}"#, r#"{"pattern": 1, "target": "reject"}"#)
    } else {
        (r#"{"pattern": 1, "target": "reject"}"#, r#"{"pattern": "_", "target": "accept"}"#)
    };
    format!(
        r#"{{
            "registers": [{{"name": "tag", "width": 1}}],
            "states": [{{
                "name": "start",
                "statements": [{{"kind": "extract", "register": "tag"}}],
                "transition": {{
                    "kind": "select",
                    "scrutinees": [{{"kind": "reg", "register": "tag"}}],
                    "cases": [{first}, {second}],
                    "default": "reject"
                }}
            }}]
        }}"#
    )
}

const MPLS_DIRECT: &str = r#"{
    "registers": [{"name": "label", "width": 4}],
    "states": [{
        "name": "start",
        "statements": [{"kind": "extract", "register": "label"}],
        "transition": {
            "kind": "select",
            "scrutinees": [{"kind": "slice", "expr": {"kind": "reg", "register": "label"}, "hi": 3, "lo": 3}],
            "cases": [{"pattern": 0, "target": "start"}],
            "default": "accept"
        }
    }]
}"#;

const MPLS_UNROLLED: &str = r#"{
    "registers": [{"name": "label", "width": 4}],
    "states": [
        {
            "name": "first",
            "statements": [{"kind": "extract", "register": "label"}],
            "transition": {
                "kind": "select",
                "scrutinees": [{"kind": "slice", "expr": {"kind": "reg", "register": "label"}, "hi": 3, "lo": 3}],
                "cases": [{"pattern": 0, "target": "rest"}],
                "default": "accept"
            }
        },
        {
            "name": "rest",
            "statements": [{"kind": "extract", "register": "label"}],
            "transition": {
                "kind": "select",
                "scrutinees": [{"kind": "slice", "expr": {"kind": "reg", "register": "label"}, "hi": 3, "lo": 3}],
                "cases": [{"pattern": 0, "target": "rest"}],
                "default": "accept"
            }
        }
    ]
}"#;

const ONE_WIDE_HEADER: &str = r#"{
    "registers": [{"name": "h", "width": 64}],
    "states": [{
        "name": "start",
        "statements": [{"kind": "extract", "register": "h"}],
        "transition": {"kind": "accept"}
    }]
}"#;

const TWO_NARROW_HEADERS: &str = r#"{
    "registers": [
        {"name": "h", "width": 64},
        {"name": "a", "width": 32},
        {"name": "b", "width": 32}
    ],
    "states": [
        {
            "name": "first",
            "statements": [{"kind": "extract", "register": "a"}],
            "transition": {
                "kind": "select",
                "scrutinees": [{"kind": "reg", "register": "a"}],
                "cases": [],
                "default": "second"
            }
        },
        {
            "name": "second",
            "statements": [
                {"kind": "extract", "register": "b"},
                {"kind": "assign", "lhs": {"register": "h"}, "rhs": {
                    "kind": "concat",
                    "lhs": {"kind": "reg", "register": "a"},
                    "rhs": {"kind": "reg", "register": "b"}
                }}
            ],
            "transition": {"kind": "accept"}
        }
    ]
}"#;

#[test]
fn self_check_emits_a_singleton_certificate() {
    let Some(mut checker) = checker(true) else { return };
    let parser = load(FOUR_BIT_ACCEPT);
    match checker.check(&parser, &parser).unwrap() {
        Outcome::Equivalent { certificate } => {
            assert_eq!(certificate.classes.len(), 1);
            assert_eq!(certificate.classes[0].left_state, "start");
            assert_eq!(certificate.classes[0].right_state, "start");
            assert!(certificate.classes[0].equal_registers.contains(&"h".to_string()));
        }
        other => panic!("expected equivalence, got {other:?}"),
    }
}

#[test]
fn width_change_of_a_shared_field_diverges() {
    let Some(mut checker) = checker(true) else { return };
    let left = load(FOUR_BIT_ACCEPT);
    let right = load(THREE_BIT_ACCEPT);
    match checker.check(&left, &right).unwrap() {
        Outcome::NotEquivalent { counterexample } => {
            assert!(verdicts_diverge(&counterexample, &left, &right));
        }
        other => panic!("expected divergence, got {other:?}"),
    }
}

#[test]
fn reordered_disjoint_select_arms_are_equivalent() {
    let Some(mut checker) = checker(true) else { return };
    let left = load(&disjoint_arms(true));
    let right = load(&disjoint_arms(false));
    assert!(checker.check(&left, &right).unwrap().is_equivalent());
}

#[test]
fn first_match_flip_yields_a_scrutinee_one_witness() {
    let Some(mut checker) = checker(true) else { return };
    let left = load(&first_match(true));
    let right = load(&first_match(false));
    match checker.check(&left, &right).unwrap() {
        Outcome::NotEquivalent { counterexample } => {
            assert_eq!(counterexample.packet, "1");
            assert_eq!(counterexample.left.verdict, "accept");
            assert_eq!(counterexample.right.verdict, "reject");
            assert!(verdicts_diverge(&counterexample, &left, &right));
        }
        other => panic!("expected divergence, got {other:?}"),
    }
}

#[test]
fn unrolled_loop_matches_the_direct_loop() {
    let Some(mut checker) = checker(true) else { return };
    let left = load(MPLS_DIRECT);
    let right = load(MPLS_UNROLLED);
    assert!(checker.check(&left, &right).unwrap().is_equivalent());
}

#[test]
fn leap_length_mismatch_is_bridged() {
    let Some(mut checker) = checker(true) else { return };
    let left = load(ONE_WIDE_HEADER);
    let right = load(TWO_NARROW_HEADERS);
    assert!(checker.check(&left, &right).unwrap().is_equivalent());
}

#[test]
fn reflexivity_holds_with_a_small_certificate() {
    let Some(mut checker) = checker(true) else { return };
    for source in [FOUR_BIT_ACCEPT, MPLS_DIRECT, ONE_WIDE_HEADER] {
        let parser = load(source);
        let states = parser.states().len();
        match checker.check(&parser, &parser).unwrap() {
            Outcome::Equivalent { certificate } => {
                assert!(!certificate.classes.is_empty());
                assert!(certificate.classes.len() <= states * states + states);
            }
            other => panic!("expected reflexive equivalence, got {other:?}"),
        }
    }
}

#[test]
fn swapping_the_inputs_swaps_nothing() {
    let Some(mut checker) = checker(true) else { return };
    let a = load(&first_match(true));
    let b = load(&first_match(false));
    let forward = checker.check(&a, &b).unwrap().is_equivalent();
    let backward = checker.check(&b, &a).unwrap().is_equivalent();
    assert_eq!(forward, backward);

    let c = load(MPLS_DIRECT);
    let d = load(MPLS_UNROLLED);
    let forward = checker.check(&c, &d).unwrap().is_equivalent();
    let backward = checker.check(&d, &c).unwrap().is_equivalent();
    assert_eq!(forward, backward);
}

#[test]
fn naive_and_leap_engines_agree() {
    let cases = [
        (FOUR_BIT_ACCEPT.to_string(), THREE_BIT_ACCEPT.to_string()),
        (first_match(true), first_match(false)),
        (MPLS_DIRECT.to_string(), MPLS_UNROLLED.to_string()),
        (ONE_WIDE_HEADER.to_string(), TWO_NARROW_HEADERS.to_string()),
    ];
    for (left, right) in cases {
        let Some(mut with_leaps) = checker(true) else { return };
        let Some(mut naive) = checker(false) else { return };
        let left = load(&left);
        let right = load(&right);
        let fast = with_leaps.check(&left, &right).unwrap().is_equivalent();
        let slow = naive.check(&left, &right).unwrap().is_equivalent();
        assert_eq!(fast, slow, "engines disagree");
    }
}

#[test]
fn certificates_carry_reverifiable_reach_conditions() {
    let Some(mut checker) = checker(true) else { return };
    let left = load(MPLS_DIRECT);
    let right = load(MPLS_UNROLLED);
    match checker.check(&left, &right).unwrap() {
        Outcome::Equivalent { certificate } => {
            for class in &certificate.classes {
                assert!(class.reach_condition.contains("(assert "));
            }
        }
        other => panic!("expected equivalence, got {other:?}"),
    }
}
