use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;

use crate::descriptor;
use crate::error::HandlerError;
use crate::introspect;
use crate::resolver::FetchId;
use crate::resolver::Resolver;
use crate::value;
use crate::*;

fn sig(s: &str) -> Signature {
    Signature::new(s).unwrap()
}

// ============================================================================
//  SIGNATURES
// ============================================================================

#[test]
fn test_signature_accepts_complete_types() {
    for s in ["s", "b", "as", "a{sv}", "a{oas}", "(ox)", "aa{sv}", "a(sa{sv})", "v", "h"] {
        assert!(Signature::new(s).is_ok(), "{} should be valid", s);
    }
}

#[test]
fn test_signature_rejects_malformed_types() {
    for s in ["", "a", "ss", "{sv}", "a{vs}", "a{s}", "a{svs}", "()", "(s", "z", "a{sv"] {
        assert!(
            matches!(Signature::new(s), Err(value::Error::InvalidSignature { .. })),
            "{:?} should be rejected",
            s
        );
    }
}

#[test]
fn test_signature_depth_is_bounded() {
    let deep = format!("{}s", "a".repeat(100));
    assert!(Signature::new(deep).is_err());
    let shallow = format!("{}s", "a".repeat(10));
    assert!(Signature::new(shallow).is_ok());
}

#[test]
fn test_signature_split_and_parts() {
    let parts = Signature::split("sa{sv}as").unwrap();
    let parts: Vec<&str> = parts.iter().map(Signature::as_str).collect();
    assert_eq!(parts, ["s", "a{sv}", "as"]);

    assert_eq!(sig("as").element(), Some(sig("s")));
    assert_eq!(sig("a{sv}").element(), None);
    assert_eq!(sig("a{sv}").dict_entry(), Some((sig("s"), sig("v"))));
    assert_eq!(sig("(oxs)").fields(), Some(vec![sig("o"), sig("x"), sig("s")]));
    assert!(sig("o").is_basic());
    assert!(!sig("v").is_basic());
}

// ============================================================================
//  NAMES
// ============================================================================

#[test]
fn test_object_path_grammar() {
    assert!(value::is_valid_object_path("/"));
    assert!(value::is_valid_object_path("/org/mpris/MediaPlayer2"));
    assert!(value::is_valid_object_path("/a_b/C9"));
    assert!(!value::is_valid_object_path(""));
    assert!(!value::is_valid_object_path("org/mpris"));
    assert!(!value::is_valid_object_path("/org/"));
    assert!(!value::is_valid_object_path("/org//mpris"));
    assert!(!value::is_valid_object_path("/org/mpris-2"));
}

#[test]
fn test_dotted_names() {
    assert!(value::is_valid_dotted_name("org.mpris.MediaPlayer2", false));
    assert!(!value::is_valid_dotted_name("mpris", false));
    assert!(!value::is_valid_dotted_name("org..mpris", false));
    assert!(!value::is_valid_dotted_name("org.2mpris", false));
    assert!(!value::is_valid_dotted_name("org.my-player", false));
    assert!(value::is_valid_dotted_name("org.my-player", true));
}

// ============================================================================
//  JSON MAPPING
// ============================================================================

#[test]
fn test_from_json_uses_declared_type() {
    assert_eq!(Value::from_json(&json!(3), &sig("x")).unwrap(), Value::Int64(3));
    assert_eq!(Value::from_json(&json!(3), &sig("d")).unwrap(), Value::Double(3.0));
    assert_eq!(Value::from_json(&json!(3.0), &sig("i")).unwrap(), Value::Int32(3));
    assert_eq!(
        Value::from_json(&json!("/a/b"), &sig("o")).unwrap(),
        Value::ObjectPath("/a/b".into())
    );
    assert_eq!(
        Value::from_json(&json!(["x", "y"]), &sig("as")).unwrap(),
        Value::string_array(["x", "y"])
    );
}

#[test]
fn test_from_json_rejects_bad_values() {
    assert!(matches!(
        Value::from_json(&json!(300), &sig("y")),
        Err(value::Error::OutOfRange { .. })
    ));
    assert!(matches!(
        Value::from_json(&json!(1.5), &sig("i")),
        Err(value::Error::TypeMismatch { .. })
    ));
    assert!(matches!(
        Value::from_json(&json!("not a path"), &sig("o")),
        Err(value::Error::InvalidObjectPath(_))
    ));
    assert!(matches!(
        Value::from_json(&json!("x"), &sig("b")),
        Err(value::Error::TypeMismatch { .. })
    ));
    assert!(matches!(
        Value::from_json(&json!(null), &sig("v")),
        Err(value::Error::NotRepresentable(_))
    ));
}

#[test]
fn test_from_json_dict_and_struct() {
    let value = Value::from_json(&json!({"title": "Song", "n": 2}), &sig("a{sv}")).unwrap();
    assert_eq!(value.signature(), sig("a{sv}"));
    assert_eq!(value.dict_get("title").and_then(Value::as_str), Some("Song"));
    assert_eq!(value.dict_get("n").and_then(Value::as_i64), Some(2));

    let numbered = Value::from_json(&json!({"7": true}), &sig("a{ib}")).unwrap();
    assert_eq!(numbered.signature(), sig("a{ib}"));

    let pair = Value::from_json(&json!(["/t/1", 5]), &sig("(ox)")).unwrap();
    assert_eq!(pair, Value::Struct(vec![Value::ObjectPath("/t/1".into()), Value::Int64(5)]));
    assert!(Value::from_json(&json!(["/t/1"]), &sig("(ox)")).is_err());
}

#[test]
fn test_infer_json() {
    assert_eq!(Value::infer_json(&json!(true)).unwrap(), Value::Bool(true));
    assert_eq!(Value::infer_json(&json!(-4)).unwrap(), Value::Int64(-4));
    assert_eq!(Value::infer_json(&json!(0.25)).unwrap(), Value::Double(0.25));
    assert_eq!(Value::infer_json(&json!(["a"])).unwrap().signature(), sig("as"));
    assert_eq!(Value::infer_json(&json!([1, "a"])).unwrap().signature(), sig("av"));
    assert_eq!(Value::infer_json(&json!({"k": 1})).unwrap().signature(), sig("a{sv}"));
}

#[test]
fn test_to_json() {
    let value = Value::dict_sv([("Volume", Value::Double(0.5)), ("Shuffle", Value::Bool(false))]);
    assert_eq!(value.to_json().unwrap(), json!({"Volume": 0.5, "Shuffle": false}));
    assert_eq!(Value::variant(Value::Int32(4)).to_json().unwrap(), json!(4));
    assert!(matches!(Value::Double(f64::NAN).to_json(), Err(value::Error::NotRepresentable(_))));
    assert!(matches!(Value::UnixFd(3).to_json(), Err(value::Error::NotRepresentable(_))));
}

#[test]
fn test_accessors_peel_variants() {
    let nested = Value::variant(Value::variant(Value::Str("x".into())));
    assert_eq!(nested.peel(), &Value::Str("x".into()));
    assert_eq!(nested.as_str(), Some("x"));
    assert_eq!(Value::UInt64(u64::MAX).as_i64(), None);
    assert_eq!(Value::Int64(3).as_f64(), None);
}

// ============================================================================
//  DESCRIPTORS
// ============================================================================

#[test]
fn test_descriptor_builds_and_looks_up() {
    let iface = InterfaceDescriptor::builder("org.example.Player")
        .method("Seek", &[("Offset", "x")], &[])
        .method("Volume", &[], &[("level", "d")])
        .property("Rate", "d", Access::ReadWrite)
        .property("Secret", "s", Access::Write)
        .signal("Seeked", &[("Position", "x")])
        .build()
        .unwrap();

    assert_eq!(iface.name(), "org.example.Player");
    assert_eq!(iface.method("Seek").unwrap().inputs[0].signature, sig("x"));
    assert_eq!(iface.property("Rate").unwrap().access, Access::ReadWrite);
    assert_eq!(iface.signal("Seeked").unwrap().args.len(), 1);
    let readable: Vec<&str> = iface.readable_properties().map(|p| p.name.as_str()).collect();
    assert_eq!(readable, ["Rate"]);
}

#[test]
fn test_descriptor_rejects_invalid_declarations() {
    let bad_name = InterfaceDescriptor::builder("nodots").build();
    assert!(matches!(bad_name, Err(descriptor::Error::InvalidInterfaceName(_))));

    let bad_member = InterfaceDescriptor::builder("org.example.A")
        .method("9lives", &[], &[])
        .build();
    assert!(matches!(bad_member, Err(descriptor::Error::InvalidMemberName { .. })));

    let bad_sig = InterfaceDescriptor::builder("org.example.A")
        .property("P", "a{vs}", Access::Read)
        .build();
    assert!(matches!(bad_sig, Err(descriptor::Error::InvalidSignature { .. })));

    let duplicate = InterfaceDescriptor::builder("org.example.A")
        .property("P", "s", Access::Read)
        .property("P", "d", Access::Read)
        .build();
    assert!(matches!(duplicate, Err(descriptor::Error::Duplicate { .. })));
}

// ============================================================================
//  RESOLVER
// ============================================================================

fn recorder() -> (Rc<RefCell<Vec<(u32, resolver::FetchOutcome)>>>, impl Fn(u32) -> resolver::Continuation) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    let make = move |tag: u32| -> resolver::Continuation {
        let sink = sink.clone();
        Box::new(move |outcome| sink.borrow_mut().push((tag, outcome)))
    };
    (log, make)
}

#[test]
fn test_resolver_fifo_per_property() {
    let (log, make) = recorder();
    let mut resolver = Resolver::new();
    let first = resolver.allocate();
    resolver.park("Position", first, make(1));
    let second = resolver.allocate();
    resolver.park("Position", second, make(2));
    let other = resolver.allocate();
    resolver.park("Other", other, make(3));

    assert!(resolver.resolve("Position", None, Value::Int64(10)));
    assert!(resolver.resolve("Position", None, Value::Int64(20)));
    assert!(!resolver.resolve("Position", None, Value::Int64(30)));

    assert_eq!(*log.borrow(), vec![(1, Ok(Value::Int64(10))), (2, Ok(Value::Int64(20)))]);
    assert_eq!(resolver.pending("Other"), 1);
}

#[test]
fn test_resolver_matches_echoed_id() {
    let (log, make) = recorder();
    let mut resolver = Resolver::new();
    let first = resolver.allocate();
    let second = resolver.allocate();
    assert!(first < second);
    resolver.park("Position", first, make(1));
    resolver.park("Position", second, make(2));

    assert!(resolver.resolve("Position", Some(second), Value::Int64(2)));
    assert!(!resolver.resolve("Position", Some(FetchId(99)), Value::Int64(0)));
    assert!(resolver.resolve("Position", Some(first), Value::Int64(1)));

    assert_eq!(*log.borrow(), vec![(2, Ok(Value::Int64(2))), (1, Ok(Value::Int64(1)))]);
    assert_eq!(resolver.total_pending(), 0);
}

#[test]
fn test_resolver_failure_consumes_its_slot() {
    let (log, make) = recorder();
    let mut resolver = Resolver::new();
    let first = resolver.allocate();
    resolver.park("Position", first, make(1));
    let second = resolver.allocate();
    resolver.park("Position", second, make(2));
    let third = resolver.allocate();
    resolver.park("Position", third, make(3));

    let error = BusError::new("org.example.Error.Failed", "unusable value");
    assert!(resolver.fail("Position", None, error.clone()));
    assert!(resolver.fail("Position", Some(third), error.clone()));
    assert!(resolver.resolve("Position", None, Value::Int64(20)));
    assert!(!resolver.fail("Position", None, error.clone()));

    assert_eq!(
        *log.borrow(),
        vec![(1, Err(error.clone())), (3, Err(error)), (2, Ok(Value::Int64(20)))]
    );
}

#[test]
fn test_resolver_abandon_drops_without_running() {
    let (log, make) = recorder();
    let mut resolver = Resolver::new();
    let a = resolver.allocate();
    resolver.park("A", a, make(1));
    let b = resolver.allocate();
    resolver.park("B", b, make(2));
    assert_eq!(resolver.abandon_all(), 2);
    assert!(log.borrow().is_empty());
    assert_eq!(resolver.total_pending(), 0);
}

#[test]
fn test_resolver_mixed_correlation_matches_model() {
    use rand::Rng;
    use std::collections::VecDeque;

    let mut rng = rand::thread_rng();
    for _ in 0..50 {
        let (log, make) = recorder();
        let mut resolver = Resolver::new();
        let mut model: VecDeque<FetchId> = VecDeque::new();
        for _ in 0..rng.gen_range(1..20) {
            let id = resolver.allocate();
            resolver.park("Position", id, make(id.0 as u32));
            model.push_back(id);
        }

        let mut expected = Vec::new();
        while !model.is_empty() {
            let id = if rng.gen_range(0..2) == 0 {
                let index = rng.gen_range(0..model.len());
                let id = model.remove(index).unwrap();
                assert!(resolver.resolve("Position", Some(id), Value::UInt64(id.0)));
                id
            } else {
                let id = model.pop_front().unwrap();
                assert!(resolver.resolve("Position", None, Value::UInt64(id.0)));
                id
            };
            expected.push((id.0 as u32, Ok(Value::UInt64(id.0))));
        }

        assert_eq!(*log.borrow(), expected);
        assert_eq!(resolver.total_pending(), 0);
    }
}

// ============================================================================
//  ERRORS AND INTROSPECTION
// ============================================================================

#[test]
fn test_error_names() {
    let ns = "org.example.Error";
    assert_eq!(
        HandlerError::UnknownObject("/x".into()).error_name(ns),
        "org.freedesktop.DBus.Error.UnknownObject"
    );
    assert_eq!(
        HandlerError::Failed("boom".into()).error_name(ns),
        "org.freedesktop.DBus.Error.Failed"
    );
    let custom = HandlerError::Custom { kind: "NoTrack".into(), message: "none".into() };
    assert_eq!(custom.error_name(ns), "org.example.Error.NoTrack");
    let qualified = HandlerError::Custom { kind: "org.other.Error.X".into(), message: String::new() };
    assert_eq!(qualified.error_name(ns), "org.other.Error.X");

    let converted: HandlerError = value::Error::InvalidObjectPath("bad".into()).into();
    assert!(matches!(converted, HandlerError::InvalidArgs(_)));
}

#[test]
fn test_introspection_lists_members() {
    let iface = InterfaceDescriptor::builder("org.example.Player")
        .method("Play", &[], &[])
        .method("Seek", &[("Offset", "x")], &[])
        .property("Volume", "d", Access::ReadWrite)
        .signal("Seeked", &[("Position", "x")])
        .build()
        .unwrap();
    let xml = introspect::to_xml(&[iface]);

    assert!(xml.starts_with("<!DOCTYPE node"));
    assert!(xml.contains(r#"<interface name="org.freedesktop.DBus.Properties">"#));
    assert!(xml.contains(r#"<interface name="org.example.Player">"#));
    assert!(xml.contains(r#"<method name="Play"/>"#));
    assert!(xml.contains(r#"<arg name="Offset" type="x" direction="in"/>"#));
    assert!(xml.contains(r#"<property name="Volume" type="d" access="readwrite"/>"#));
    assert!(xml.contains(r#"<arg name="Position" type="x"/>"#));
    assert!(xml.trim_end().ends_with("</node>"));
}
