//! Relay functions visible to Rhai programs.
//!
//! Everything lives in one static module (`relay` by default):
//!
//! - `relay::yield_host()` hands control to the host and returns the event
//!   that resumed the program, or `()` when the host is finishing or there
//!   is no host thread to yield to
//! - `relay::is_finishing()` reports whether the host asked the program to
//!   return
//!
//! An event is always a map. A callback without a record arrives with
//! reason `"none"` and every other field `()`.

use rhai::{Dynamic, Engine, EvalAltResult, Map, Module, INT};

use crate::events::EventRecord;
use crate::interpreter::{HostLink, Resumption};

/// Register the relay module with the Rhai engine.
pub fn register(engine: &mut Engine, module_name: &str, host: HostLink) {
    let mut module = Module::new();

    let link = host.clone();
    module.set_native_fn(
        "yield_host",
        move || -> Result<Dynamic, Box<EvalAltResult>> {
            match link.yield_host() {
                Ok(Resumption::Event(event)) => Ok(event_to_dynamic(event.as_ref())),
                Ok(Resumption::Finish) | Ok(Resumption::Detached) => Ok(Dynamic::UNIT),
                Err(e) => Err(e.to_string().into()),
            }
        },
    );

    let link = host;
    module.set_native_fn(
        "is_finishing",
        move || -> Result<bool, Box<EvalAltResult>> { Ok(link.is_finishing()) },
    );

    engine.register_static_module(module_name, module.into());
}

/// Reason given to a callback that carried no record.
pub const NO_RECORD: &str = "none";

/// The map a program receives for an event.
pub fn event_to_dynamic(event: Option<&EventRecord>) -> Dynamic {
    let mut map = Map::new();
    match event {
        Some(event) => {
            map.insert(
                "reason".into(),
                Dynamic::from(event.reason.as_str().to_string()),
            );
            map.insert("time".into(), Dynamic::from_int(saturating_int(event.time)));
            map.insert(
                "tag".into(),
                event
                    .tag
                    .map(|tag| Dynamic::from_int(saturating_int(tag)))
                    .unwrap_or(Dynamic::UNIT),
            );
            map.insert("object".into(), optional_string(event.object.as_deref()));
            map.insert("value".into(), optional_string(event.value.as_deref()));
        }
        None => {
            map.insert("reason".into(), Dynamic::from(NO_RECORD.to_string()));
            for key in ["time", "tag", "object", "value"] {
                map.insert(key.into(), Dynamic::UNIT);
            }
        }
    }
    Dynamic::from_map(map)
}

/// Rhai integers are signed; values past `INT::MAX` are clamped.
fn saturating_int(value: u64) -> INT {
    INT::try_from(value).unwrap_or(INT::MAX)
}

fn optional_string(value: Option<&str>) -> Dynamic {
    match value {
        Some(s) => Dynamic::from(s.to_string()),
        None => Dynamic::UNIT,
    }
}
