use std::any::Any;

/// Extracts the message of a panic payload, if it carries one.
///
/// `panic!("literal")` produces a `&'static str` payload while formatted
/// panics produce a `String`. Anything else (e.g. `panic_any`) has no
/// printable message.
pub(crate) fn panic_payload_as_str(payload: &(dyn Any + Send)) -> Option<&str> {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        Some(s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        Some(s.as_str())
    } else {
        None
    }
}
