//! Session registry and proxy behavior against the in-memory bus.

use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;

use serde_json::Value as Json;
use serde_json::json;

use busobj::MethodCall;
use busobj::Value;
use busobj::introspect::PROPERTIES_INTERFACE;
use busobj::mock_bus::MockBus;
use busobj::mock_bus::MockReply;
use jsonframe::FrameReader;
use jsonframe::FrameWriter;
use mprisbridge::mpris::NO_TRACK;
use mprisbridge::mpris::PLAYER_INTERFACE;
use mprisbridge::mpris::ROOT_INTERFACE;
use mprisbridge::session::CallReceiver;
use mprisbridge::*;

const BASE_NAME: &str = "org.mpris.MediaPlayer2.browser";
const PATH: &str = "/org/mpris/MediaPlayer2";
const PREFIX: &str = "/org/mpris/MediaPlayer2/Track";

type SharedWriter = Rc<RefCell<FrameWriter<Vec<u8>>>>;

struct Fixture {
    bus: MockBus,
    outbox: SharedWriter,
    registry: SessionRegistry,
    calls: CallReceiver,
}

fn settings() -> ProxySettings {
    ProxySettings {
        object_path: PATH.into(),
        track_path_prefix: PREFIX.into(),
        identity: "Browser".into(),
        desktop_entry: None,
    }
}

fn fixture() -> Fixture {
    let bus = MockBus::new();
    let outbox: SharedWriter = Rc::new(RefCell::new(FrameWriter::new(Vec::new())));
    let (registry, calls) = SessionRegistry::new(Rc::new(bus.clone()), outbox.clone(), settings(), BASE_NAME);
    Fixture { bus, outbox, registry, calls }
}

impl Fixture {
    fn deliver(&mut self, json: Json) {
        let message = PeerMessage::from_json(json).unwrap();
        self.registry.handle_message(message).unwrap();
    }

    /// Sends a bus call to `name` and routes it through the registry.
    fn call(&mut self, name: &str, interface: &str, member: &str, args: Vec<Value>) -> MockReply {
        let reply = self.bus.call(name, MethodCall::new(PATH, interface, member, args));
        while let Ok(inbound) = self.calls.try_recv() {
            self.registry.handle_call(inbound);
        }
        reply
    }

    fn get(&mut self, name: &str, property: &str) -> MockReply {
        self.call(
            name,
            PROPERTIES_INTERFACE,
            "Get",
            vec![Value::str(PLAYER_INTERFACE), Value::str(property)],
        )
    }

    /// Every frame written to the peer so far, decoded.
    fn sent(&self) -> Vec<Json> {
        let bytes = self.outbox.borrow().get_ref().clone();
        let mut reader = FrameReader::new(Cursor::new(bytes));
        let mut frames = Vec::new();
        loop {
            match reader.read::<Json>() {
                Ok(frame) => frames.push(frame),
                Err(e) if e.is_eof() => return frames,
                Err(e) => panic!("bad outbound frame: {}", e),
            }
        }
    }

    fn cached(&self, session: i64, property: &str) -> Option<Value> {
        let player = self.registry.player(&SessionId::Int(session))?;
        player.service().context().cache().get(property).cloned()
    }
}

// --- Inbound Events ---

#[test]
fn test_changed_event_updates_cache_and_signals_once() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 7, "args": [{"Volume": 0.5, "PlaybackStatus": "Playing"}]}));

    assert_eq!(fx.bus.names(), vec![BASE_NAME.to_string()]);
    assert_eq!(fx.cached(7, "Volume"), Some(Value::Double(0.5)));
    assert_eq!(fx.cached(7, "PlaybackStatus"), Some(Value::str("Playing")));

    let signals = fx.bus.take_signals();
    assert_eq!(signals.len(), 1);
    let signal = &signals[0];
    assert_eq!(signal.member, "PropertiesChanged");
    assert_eq!(signal.args[0], Value::str(PLAYER_INTERFACE));
    assert_eq!(signal.args[1].dict_get("Volume").map(Value::peel), Some(&Value::Double(0.5)));
    assert_eq!(signal.args[1].dict_get("PlaybackStatus").and_then(Value::as_str), Some("Playing"));
    assert!(fx.sent().is_empty());
}

#[test]
fn test_changed_event_across_interfaces_signals_each() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 1, "args": [{"Identity": "Tab", "Shuffle": true}]}));

    let signals = fx.bus.take_signals();
    let interfaces: Vec<&str> = signals.iter().filter_map(|s| s.args[0].as_str()).collect();
    assert_eq!(signals.len(), 2);
    assert!(interfaces.contains(&ROOT_INTERFACE));
    assert!(interfaces.contains(&PLAYER_INTERFACE));
}

#[test]
fn test_changed_event_drops_unusable_entries() {
    let mut fx = fixture();
    fx.deliver(json!({
        "type": "changed",
        "tabId": 1,
        "args": [{"Volume": "loud", "Bogus": 1, "Position": 5, "Rate": 2}]
    }));

    assert_eq!(fx.cached(1, "Volume"), Some(Value::Double(1.0)));
    assert_eq!(fx.cached(1, "Rate"), Some(Value::Double(2.0)));
    assert_eq!(fx.cached(1, "Bogus"), None);
    assert_eq!(fx.cached(1, "Position"), None);

    let signals = fx.bus.take_signals();
    assert_eq!(signals.len(), 1);
    assert!(signals[0].args[1].dict_get("Volume").is_none());
}

#[test]
fn test_metadata_track_id_is_escaped() {
    let mut fx = fixture();
    fx.deliver(json!({
        "type": "changed",
        "tabId": 2,
        "args": [{"Metadata": {"mpris:trackid": "v=abc", "xesam:title": "Song", "extra": 1}}]
    }));

    let metadata = fx.cached(2, "Metadata").unwrap();
    assert_eq!(
        metadata.dict_get("mpris:trackid").map(Value::peel),
        Some(&Value::ObjectPath(format!("{}/v_3Dabc", PREFIX)))
    );
    assert_eq!(metadata.dict_get("xesam:title").and_then(Value::as_str), Some("Song"));
    assert!(metadata.dict_get("extra").is_none());
}

#[test]
fn test_seeked_event_emits_signal() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "seeked", "tabId": 3, "args": [1_500_000]}));

    let signals = fx.bus.take_signals();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].interface, PLAYER_INTERFACE);
    assert_eq!(signals[0].member, "Seeked");
    assert_eq!(signals[0].args, vec![Value::Int64(1_500_000)]);
}

#[test]
fn test_unknown_and_return_events_create_nothing() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "mystery", "tabId": 1}));
    fx.deliver(json!({"type": "return", "tabId": 1, "method": "Position", "args": [3]}));
    fx.deliver(json!({"type": "call", "tabId": 1, "method": "Play", "args": []}));
    assert!(fx.registry.is_empty());
    assert!(fx.bus.names().is_empty());
}

// --- Session Lifecycle ---

#[test]
fn test_quit_for_unknown_session_is_a_noop() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "quit", "tabId": 99}));
    assert!(fx.registry.is_empty());
    assert!(fx.bus.names().is_empty());
    assert_eq!(fx.bus.closed_connections(), 0);
}

#[test]
fn test_quit_tears_session_down() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 7, "args": [{"Volume": 0.5}]}));
    assert_eq!(fx.bus.objects().len(), 1);

    fx.deliver(json!({"type": "quit", "tabId": 7}));
    assert!(fx.registry.is_empty());
    assert!(fx.bus.names().is_empty());
    assert!(fx.bus.objects().is_empty());
    assert_eq!(fx.bus.closed_connections(), 1);
}

#[test]
fn test_concurrent_sessions_get_instance_names() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 1, "args": [{}]}));
    fx.deliver(json!({"type": "changed", "tabId": "tab-2", "args": [{}]}));

    assert_eq!(fx.registry.bus_name(&SessionId::Int(1)), Some(BASE_NAME));
    let second = format!("{}.instancetab_2D2", BASE_NAME);
    assert_eq!(fx.registry.bus_name(&SessionId::from("tab-2")), Some(second.as_str()));

    fx.deliver(json!({"type": "quit", "tabId": 1}));
    fx.deliver(json!({"type": "quit", "tabId": "tab-2"}));
    fx.deliver(json!({"type": "changed", "tabId": 3, "args": [{}]}));
    assert_eq!(fx.registry.bus_name(&SessionId::Int(3)), Some(BASE_NAME));
}

#[test]
fn test_base_name_taken_elsewhere_falls_back() {
    let mut fx = fixture();
    let other = busobj::BusConnector::connect(&fx.bus).unwrap();
    other.request_name(BASE_NAME).unwrap();

    fx.deliver(json!({"type": "changed", "tabId": 5, "args": [{}]}));
    let expected = format!("{}.instance5", BASE_NAME);
    assert_eq!(fx.registry.bus_name(&SessionId::Int(5)), Some(expected.as_str()));
}

#[test]
fn test_long_session_id_still_gets_a_valid_name() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 1, "args": [{}]}));
    let long = "tab/".repeat(80);
    fx.deliver(json!({"type": "changed", "tabId": long, "args": [{}]}));
    fx.deliver(json!({"type": "changed", "tabId": "x".repeat(300), "args": [{}]}));

    let first = fx.registry.bus_name(&SessionId::from(long.as_str())).unwrap();
    assert_eq!(first, format!("{}.session1", BASE_NAME));
    assert!(busobj::value::is_valid_dotted_name(first, true));
    let second = fx.registry.bus_name(&SessionId::from("x".repeat(300).as_str())).unwrap();
    assert_eq!(second, format!("{}.session2", BASE_NAME));
    assert_eq!(fx.bus.names().len(), 3);
}

#[test]
fn test_rejected_name_fails_creation_and_cleans_up() {
    let fx_bus = MockBus::new();
    fx_bus.reject_name(BASE_NAME);
    let outbox: SharedWriter = Rc::new(RefCell::new(FrameWriter::new(Vec::new())));
    let (mut registry, _calls) = SessionRegistry::new(Rc::new(fx_bus.clone()), outbox, settings(), BASE_NAME);

    let message = PeerMessage::from_json(json!({"type": "changed", "tabId": 1, "args": [{}]})).unwrap();
    assert!(registry.handle_message(message).is_err());
    assert!(registry.is_empty());
    assert_eq!(fx_bus.closed_connections(), 1);
}

#[test]
fn test_shutdown_closes_everything() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 1, "args": [{}]}));
    fx.deliver(json!({"type": "changed", "tabId": 2, "args": [{}]}));
    assert_eq!(fx.registry.shutdown(), 2);
    assert!(fx.bus.names().is_empty());
    assert_eq!(fx.bus.closed_connections(), 2);
}

// --- Outbound Calls ---

#[test]
fn test_playback_methods_are_forwarded() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 7, "args": [{}]}));

    assert_eq!(fx.call(BASE_NAME, PLAYER_INTERFACE, "PlayPause", vec![]).values(), Some(vec![]));
    assert_eq!(fx.call(BASE_NAME, PLAYER_INTERFACE, "Seek", vec![Value::Int64(-5_000_000)]).values(), Some(vec![]));
    assert_eq!(fx.call(BASE_NAME, ROOT_INTERFACE, "Raise", vec![]).values(), Some(vec![]));

    assert_eq!(
        fx.sent(),
        vec![
            json!({"type": "call", "tabId": 7, "method": "PlayPause", "args": []}),
            json!({"type": "call", "tabId": 7, "method": "Seek", "args": [-5_000_000]}),
            json!({"type": "call", "tabId": 7, "method": "Raise", "args": []}),
        ]
    );
}

#[test]
fn test_property_write_is_forwarded_not_cached() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 7, "args": [{}]}));

    let reply = fx.call(
        BASE_NAME,
        PROPERTIES_INTERFACE,
        "Set",
        vec![Value::str(PLAYER_INTERFACE), Value::str("Volume"), Value::variant(Value::Double(0.25))],
    );
    assert_eq!(reply.values(), Some(vec![]));
    assert_eq!(fx.sent(), vec![json!({"type": "call", "tabId": 7, "method": "Volume", "args": [0.25]})]);
    assert_eq!(fx.cached(7, "Volume"), Some(Value::Double(1.0)));
}

#[test]
fn test_set_position_on_no_track_sends_nothing() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 7, "args": [{}]}));

    let args = vec![Value::ObjectPath(NO_TRACK.into()), Value::Int64(10)];
    let reply = fx.call(BASE_NAME, PLAYER_INTERFACE, "SetPosition", args);
    assert_eq!(reply.values(), Some(vec![]));
    assert!(fx.sent().is_empty());
}

#[test]
fn test_set_position_unescapes_track_id() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 7, "args": [{}]}));

    let track = format!("{}/v_3Dabc", PREFIX);
    let args = vec![Value::ObjectPath(track), Value::Int64(42)];
    assert_eq!(fx.call(BASE_NAME, PLAYER_INTERFACE, "SetPosition", args).values(), Some(vec![]));
    assert_eq!(
        fx.sent(),
        vec![json!({"type": "call", "tabId": 7, "method": "SetPosition", "args": ["v=abc", 42]})]
    );

    let foreign = vec![Value::ObjectPath("/somewhere/else".into()), Value::Int64(1)];
    let reply = fx.call(BASE_NAME, PLAYER_INTERFACE, "SetPosition", foreign);
    assert_eq!(reply.error().map(|e| e.name).as_deref(), Some("org.freedesktop.DBus.Error.InvalidArgs"));
}

#[test]
fn test_call_for_removed_session_is_unknown_object() {
    let mut fx = fixture();
    let (reply, pending) = MockReply::new();
    fx.registry.handle_call(InboundCall {
        session: SessionId::Int(8),
        call: MethodCall::new(PATH, PLAYER_INTERFACE, "Play", vec![]),
        pending,
    });
    assert_eq!(reply.error().map(|e| e.name).as_deref(), Some("org.freedesktop.DBus.Error.UnknownObject"));
}

#[test]
fn test_unreachable_peer_fails_the_call() {
    struct Unreachable;
    impl Outbox for Unreachable {
        fn send(&self, _message: &PeerMessage) -> jsonframe::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone").into())
        }
    }

    let bus = MockBus::new();
    let (mut registry, mut calls) = SessionRegistry::new(Rc::new(bus.clone()), Rc::new(Unreachable), settings(), BASE_NAME);
    registry
        .handle_message(PeerMessage::from_json(json!({"type": "changed", "tabId": 1, "args": [{}]})).unwrap())
        .unwrap();

    let reply = bus.call(BASE_NAME, MethodCall::new(PATH, PLAYER_INTERFACE, "Next", vec![]));
    while let Ok(inbound) = calls.try_recv() {
        registry.handle_call(inbound);
    }
    assert_eq!(reply.error().map(|e| e.name).as_deref(), Some("org.freedesktop.DBus.Error.Failed"));
}

// --- Position Reads ---

#[test]
fn test_position_read_round_trip() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 7, "args": [{}]}));

    let reply = fx.get(BASE_NAME, "Position");
    assert!(reply.is_pending());
    assert_eq!(
        fx.sent(),
        vec![json!({"type": "call", "tabId": 7, "method": "Position", "args": [], "id": 1})]
    );

    fx.deliver(json!({"type": "return", "tabId": 7, "method": "Position", "args": [123_456], "id": 1}));
    assert_eq!(reply.values(), Some(vec![Value::variant(Value::Int64(123_456))]));
}

#[test]
fn test_position_reads_without_ids_resolve_fifo() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 7, "args": [{}]}));

    let first = fx.get(BASE_NAME, "Position");
    let second = fx.get(BASE_NAME, "Position");
    assert_eq!(fx.sent().len(), 2);

    fx.deliver(json!({"type": "return", "tabId": 7, "method": "Position", "args": [900]}));
    assert_eq!(first.values(), Some(vec![Value::variant(Value::Int64(900))]));
    assert!(second.is_pending());

    fx.deliver(json!({"type": "return", "tabId": 7, "method": "Position", "args": [100]}));
    assert_eq!(second.values(), Some(vec![Value::variant(Value::Int64(100))]));
}

#[test]
fn test_position_reads_with_ids_resolve_out_of_order() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 7, "args": [{}]}));

    let first = fx.get(BASE_NAME, "Position");
    let second = fx.get(BASE_NAME, "Position");
    let ids: Vec<u64> = fx.sent().iter().filter_map(|f| f["id"].as_u64()).collect();
    assert_eq!(ids.len(), 2);

    fx.deliver(json!({"type": "return", "tabId": 7, "method": "Position", "args": [20], "id": ids[1]}));
    fx.deliver(json!({"type": "return", "tabId": 7, "method": "Position", "args": [10], "id": ids[0]}));
    assert_eq!(first.values(), Some(vec![Value::variant(Value::Int64(10))]));
    assert_eq!(second.values(), Some(vec![Value::variant(Value::Int64(20))]));
}

#[test]
fn test_unusable_position_return_fails_its_read() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 7, "args": [{}]}));

    let reply = fx.get(BASE_NAME, "Position");
    fx.deliver(json!({"type": "return", "tabId": 7, "method": "Position", "args": [null], "id": 1}));
    assert_eq!(reply.error().map(|e| e.name).as_deref(), Some("org.freedesktop.DBus.Error.Failed"));
    assert_eq!(reply.reply_count(), 1);

    let player = fx.registry.player(&SessionId::Int(7)).unwrap();
    assert_eq!(player.service().context().pending_fetches(), 0);
}

#[test]
fn test_unusable_return_without_id_keeps_fifo_order() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 7, "args": [{}]}));

    let first = fx.get(BASE_NAME, "Position");
    let second = fx.get(BASE_NAME, "Position");
    fx.deliver(json!({"type": "return", "tabId": 7, "method": "Position", "args": ["soon"]}));
    fx.deliver(json!({"type": "return", "tabId": 7, "method": "Position", "args": [300]}));

    assert!(first.error().is_some());
    assert_eq!(second.values(), Some(vec![Value::variant(Value::Int64(300))]));
}

#[test]
fn test_get_all_player_waits_for_position() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 7, "args": [{"Volume": 0.5}]}));

    let reply = fx.call(BASE_NAME, PROPERTIES_INTERFACE, "GetAll", vec![Value::str(PLAYER_INTERFACE)]);
    assert!(reply.is_pending());

    fx.deliver(json!({"type": "return", "tabId": 7, "method": "Position", "args": [77.9]}));
    let values = reply.values().unwrap();
    let all = &values[0];
    assert_eq!(all.dict_get("Position").map(Value::peel), Some(&Value::Int64(77)));
    assert_eq!(all.dict_get("Volume").map(Value::peel), Some(&Value::Double(0.5)));
    assert_eq!(all.dict_get("PlaybackStatus").and_then(Value::as_str), Some("Stopped"));
}

#[test]
fn test_get_all_root_is_immediate() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 7, "args": [{}]}));

    let reply = fx.call(BASE_NAME, PROPERTIES_INTERFACE, "GetAll", vec![Value::str(ROOT_INTERFACE)]);
    let values = reply.values().unwrap();
    let all = &values[0];
    assert_eq!(all.dict_get("Identity").and_then(Value::as_str), Some("Browser"));
    assert_eq!(all.dict_get("CanQuit").and_then(Value::as_bool), Some(true));
    assert!(all.dict_get("DesktopEntry").is_none());
}

#[test]
fn test_quit_abandons_pending_reads() {
    let mut fx = fixture();
    fx.deliver(json!({"type": "changed", "tabId": 7, "args": [{}]}));
    let reply = fx.get(BASE_NAME, "Position");

    fx.deliver(json!({"type": "quit", "tabId": 7}));
    fx.deliver(json!({"type": "return", "tabId": 7, "method": "Position", "args": [1]}));
    assert!(reply.is_pending());
    assert!(fx.registry.is_empty());
}
