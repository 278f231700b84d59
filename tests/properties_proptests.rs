// Registry property tests.
//
// Property 1: a property set behaves like a map from name to the last
// value written.
//  - Model: HashMap<&str, Value>.
//  - Operations: set number/float/boolean/string, clear, copy to a
//    scratch set.
//  - Invariant: property_type and the native getter agree with the model
//    after every step; absent names read as the caller's default.
//
// Property 2: string→number reads agree with Rust parsing for plain
// decimal text.
use propstore::{PropertyType, Registry};
use proptest::prelude::*;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq)]
enum Value {
    Number(i64),
    Float(f32),
    Boolean(bool),
    Text(String),
}

#[derive(Clone, Debug)]
enum Op {
    Set(usize, Value),
    Clear(usize),
    CopyRoundTrip,
}

const NAMES: [&str; 6] = ["alpha", "beta", "gamma", "delta", "eps", "zeta"];

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::Number),
        (-1.0e6f32..1.0e6f32).prop_map(Value::Float),
        any::<bool>().prop_map(Value::Boolean),
        "[a-z0-9 ]{0,12}".prop_map(Value::Text),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0..NAMES.len(), arb_value()).prop_map(|(n, v)| Op::Set(n, v)),
        2 => (0..NAMES.len()).prop_map(Op::Clear),
        1 => Just(Op::CopyRoundTrip),
    ]
}

fn expected_type(v: &Value) -> PropertyType {
    match v {
        Value::Number(_) => PropertyType::Number,
        Value::Float(_) => PropertyType::Float,
        Value::Boolean(_) => PropertyType::Boolean,
        Value::Text(_) => PropertyType::String,
    }
}

// Property 1: set/clear/copy against a HashMap model.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_set_behaves_like_map(ops in proptest::collection::vec(arb_op(), 1..80)) {
        let reg = Registry::new();
        let p = reg.create_properties().unwrap();
        let mut model: HashMap<&'static str, Value> = HashMap::new();

        for op in ops {
            match op {
                Op::Set(n, v) => {
                    let name = NAMES[n];
                    match &v {
                        Value::Number(x) => reg.set_number(p, name, *x).unwrap(),
                        Value::Float(x) => reg.set_float(p, name, *x).unwrap(),
                        Value::Boolean(x) => reg.set_boolean(p, name, *x).unwrap(),
                        Value::Text(x) => reg.set_string(p, name, Some(x.as_str())).unwrap(),
                    }
                    model.insert(name, v);
                }
                Op::Clear(n) => {
                    reg.clear_property(p, NAMES[n]).unwrap();
                    model.remove(NAMES[n]);
                }
                Op::CopyRoundTrip => {
                    // Copy out and back: contents must be unchanged.
                    let scratch = reg.create_properties().unwrap();
                    reg.copy_properties(p, scratch).unwrap();
                    reg.copy_properties(scratch, p).unwrap();
                    reg.destroy_properties(scratch);
                }
            }

            for name in NAMES {
                match model.get(name) {
                    None => {
                        prop_assert!(!reg.has_property(p, name));
                        prop_assert_eq!(reg.get_number(p, name, -99), -99);
                    }
                    Some(v) => {
                        prop_assert_eq!(reg.property_type(p, name), expected_type(v));
                        match v {
                            Value::Number(x) => prop_assert_eq!(reg.get_number(p, name, 0), *x),
                            Value::Float(x) => prop_assert_eq!(reg.get_float(p, name, 0.0), *x),
                            Value::Boolean(x) => prop_assert_eq!(reg.get_boolean(p, name, !*x), *x),
                            Value::Text(x) => prop_assert_eq!(reg.get_string(p, name, "?").to_string(), x.clone()),
                        }
                    }
                }
            }
        }

        let mut seen = Vec::new();
        reg.enumerate_properties(p, |_, name| seen.push(name.to_string())).unwrap();
        seen.sort();
        let mut expected: Vec<String> = model.keys().map(|k| k.to_string()).collect();
        expected.sort();
        prop_assert_eq!(seen, expected);
    }
}

// Property 2: decimal strings read back as the same number.
proptest! {
    #[test]
    fn prop_decimal_strings_parse(n in any::<i64>(), pad in "[ \t]{0,3}", tail in "[g-z ]{0,4}") {
        let reg = Registry::new();
        let p = reg.create_properties().unwrap();
        // Leading zeros would switch to octal; any::<i64> never has them.
        let text = format!("{pad}{n}{tail}");
        reg.set_string(p, "n", Some(text.as_str())).unwrap();
        prop_assert_eq!(reg.get_number(p, "n", 0), n);
        prop_assert_eq!(reg.get_boolean(p, "n", false), !text.starts_with('0'));
    }
}
