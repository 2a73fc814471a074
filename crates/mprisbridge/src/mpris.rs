//! # MPRIS Interfaces
//!
//! Static descriptors of the two MPRIS interfaces a remote player is exposed
//! through, the metadata type table, and the initial property values.

use busobj::Access;
use busobj::InterfaceDescriptor;
use busobj::Signature;
use busobj::Value;
use busobj::descriptor;

pub const ROOT_INTERFACE: &str = "org.mpris.MediaPlayer2";
pub const PLAYER_INTERFACE: &str = "org.mpris.MediaPlayer2.Player";

/// Track id meaning "no track"; `SetPosition` against it does nothing.
pub const NO_TRACK: &str = "/org/mpris/MediaPlayer2/TrackList/NoTrack";

pub const TRACK_ID_KEY: &str = "mpris:trackid";

/// Properties whose value lives only on the remote side.
pub const REMOTE_PROPERTIES: &[&str] = &["Position"];

/// Recognized metadata keys and their types. Anything else is dropped.
pub const METADATA_TYPES: &[(&str, &str)] = &[
    ("mpris:trackid", "o"),
    ("mpris:length", "x"),
    ("mpris:artUrl", "s"),
    ("xesam:album", "s"),
    ("xesam:albumArtist", "as"),
    ("xesam:artist", "as"),
    ("xesam:asText", "s"),
    ("xesam:audioBPM", "i"),
    ("xesam:autoRating", "d"),
    ("xesam:comment", "as"),
    ("xesam:composer", "as"),
    ("xesam:contentCreated", "s"),
    ("xesam:discNumber", "i"),
    ("xesam:firstUsed", "s"),
    ("xesam:genre", "as"),
    ("xesam:lastUsed", "s"),
    ("xesam:lyricist", "as"),
    ("xesam:title", "s"),
    ("xesam:trackNumber", "i"),
    ("xesam:url", "s"),
    ("xesam:useCount", "i"),
    ("xesam:userRating", "d"),
];

/// The declared type of a metadata key, if it is recognized.
pub fn metadata_signature(key: &str) -> Option<Signature> {
    METADATA_TYPES
        .iter()
        .find(|(k, _)| *k == key)
        .and_then(|(_, signature)| Signature::new(*signature).ok())
}

pub fn root_interface() -> descriptor::Result<InterfaceDescriptor> {
    InterfaceDescriptor::builder(ROOT_INTERFACE)
        .method("Raise", &[], &[])
        .method("Quit", &[], &[])
        .property("CanQuit", "b", Access::Read)
        .property("CanRaise", "b", Access::Read)
        .property("HasTrackList", "b", Access::Read)
        .property("Identity", "s", Access::Read)
        .property("DesktopEntry", "s", Access::Read)
        .property("SupportedUriSchemes", "as", Access::Read)
        .property("SupportedMimeTypes", "as", Access::Read)
        .build()
}

pub fn player_interface() -> descriptor::Result<InterfaceDescriptor> {
    InterfaceDescriptor::builder(PLAYER_INTERFACE)
        .method("Next", &[], &[])
        .method("Previous", &[], &[])
        .method("Pause", &[], &[])
        .method("PlayPause", &[], &[])
        .method("Stop", &[], &[])
        .method("Play", &[], &[])
        .method("Seek", &[("Offset", "x")], &[])
        .method("SetPosition", &[("TrackId", "o"), ("Position", "x")], &[])
        .method("OpenUri", &[("Uri", "s")], &[])
        .property("PlaybackStatus", "s", Access::Read)
        .property("LoopStatus", "s", Access::ReadWrite)
        .property("Rate", "d", Access::ReadWrite)
        .property("Shuffle", "b", Access::ReadWrite)
        .property("Metadata", "a{sv}", Access::Read)
        .property("Volume", "d", Access::ReadWrite)
        .property("Position", "x", Access::Read)
        .property("MinimumRate", "d", Access::Read)
        .property("MaximumRate", "d", Access::Read)
        .property("CanGoNext", "b", Access::Read)
        .property("CanGoPrevious", "b", Access::Read)
        .property("CanPlay", "b", Access::Read)
        .property("CanPause", "b", Access::Read)
        .property("CanSeek", "b", Access::Read)
        .property("CanControl", "b", Access::Read)
        .signal("Seeked", &[("Position", "x")])
        .build()
}

/// Both interfaces, root first.
pub fn descriptors() -> descriptor::Result<Vec<InterfaceDescriptor>> {
    Ok(vec![root_interface()?, player_interface()?])
}

/// Property values a freshly exposed player starts with.
pub fn initial_properties(identity: &str, desktop_entry: Option<&str>) -> Vec<(&'static str, Value)> {
    let mut values = vec![
        ("CanQuit", Value::Bool(true)),
        ("CanRaise", Value::Bool(true)),
        ("HasTrackList", Value::Bool(false)),
        ("Identity", Value::str(identity)),
        ("SupportedUriSchemes", Value::string_array(Vec::<String>::new())),
        ("SupportedMimeTypes", Value::string_array(Vec::<String>::new())),
        ("PlaybackStatus", Value::str("Stopped")),
        ("LoopStatus", Value::str("None")),
        ("Rate", Value::Double(1.0)),
        ("Shuffle", Value::Bool(false)),
        ("Metadata", Value::dict_sv(Vec::<(String, Value)>::new())),
        ("Volume", Value::Double(1.0)),
        ("MinimumRate", Value::Double(1.0)),
        ("MaximumRate", Value::Double(1.0)),
        ("CanGoNext", Value::Bool(true)),
        ("CanGoPrevious", Value::Bool(true)),
        ("CanPlay", Value::Bool(true)),
        ("CanPause", Value::Bool(true)),
        ("CanSeek", Value::Bool(true)),
        ("CanControl", Value::Bool(true)),
    ];
    if let Some(entry) = desktop_entry {
        values.push(("DesktopEntry", Value::str(entry)));
    }
    values
}
