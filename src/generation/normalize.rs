//! Locator extraction from raw provider replies.
//!
//! Providers return arbitrarily nested JSON: a bare string, an object with
//! the video under one of several keys, or lists/tuples wrapping either.
//! `extract_locator` reduces any such reply to a single locator string
//! (local path or URL) without touching the filesystem or the network;
//! whether the locator is usable is the materializer's concern.

use serde_json::Value;

/// Keys probed, in order, when a reply is a JSON object.
pub const LOCATOR_KEYS: [&str; 6] = ["video", "path", "file", "output", "video_path", "url"];

/// Extract a video locator from a provider reply, if one is present.
///
/// Resolution order is fixed for determinism:
/// 1. A string reply is the locator itself.
/// 2. An object is probed for `LOCATOR_KEYS` in declaration order; the
///    first value that is itself a string wins. Object values are not
///    recursed into.
/// 3. An array is searched depth-first; the first element yielding a
///    locator wins. A bare string element is a locator on its own, so
///    `["ok", {"path": "..."}]` resolves to `"ok"`.
/// 4. Numbers, booleans, and null yield `None`.
///
/// Total and side-effect-free; never fails.
pub fn extract_locator(reply: &Value) -> Option<String> {
    match reply {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => LOCATOR_KEYS.iter().find_map(|key| match map.get(*key) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }),
        Value::Array(items) => items.iter().find_map(extract_locator),
        _ => None,
    }
}
