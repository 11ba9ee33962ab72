//! Simple to ``stderr`` logger.
//!
//! `warn!` and `error!` are always emitted. `trace!`, `debug!` and `info!` are only
//! emitted when this crate is built with the `debug` feature; otherwise their
//! arguments are still type checked, but nothing is evaluated at runtime.

/// Timestamp related functions.
///
/// This module is used by the generated macros in external crates; so this has
/// to be public in scope.
#[cfg(feature = "debug")]
pub mod timestamp {
    use chrono::Utc;

    /// Generate the current timestamp.
    pub fn now() -> String {
        Utc::now().to_rfc3339()
    }
}

/// Write a single coloured line to ``stderr``.
///
/// Not meant to be called directly; use the level macros instead.
#[doc(hidden)]
#[cfg(feature = "debug")]
#[macro_export]
macro_rules! __emit {
    ($label:literal, $label_colour:literal, $text_colour:literal, $($arg:tt)+) => {{
        eprintln!(
            concat!(
                "\x1b[38:5:240m{}\x1b[39m \x1b[1m\x1b[38:5:", $label_colour, "m", $label,
                "\x1b[39m | \x1b[22m\x1b[38:5:", $text_colour, "m{}\x1b[39m"
            ),
            $crate::timestamp::now(),
            format_args!($($arg)+)
        );
    }};
}

#[doc(hidden)]
#[cfg(not(feature = "debug"))]
#[macro_export]
macro_rules! __emit {
    ($label:literal, $label_colour:literal, $text_colour:literal, $($arg:tt)+) => {{
        eprintln!(
            concat!(
                "\x1b[1m\x1b[38:5:", $label_colour, "m", $label,
                "\x1b[39m | \x1b[22m\x1b[38:5:", $text_colour, "m{}\x1b[39m"
            ),
            format_args!($($arg)+)
        );
    }};
}

/// Swallow a debug level line when the `debug` feature is off.
#[doc(hidden)]
#[macro_export]
macro_rules! __skip {
    ($($arg:tt)+) => {{
        if false {
            let _ = format!($($arg)+);
        }
    }};
}

#[cfg(feature = "debug")]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => { $crate::__emit!("TRACE", "240", "240", $($arg)+) };
}

#[cfg(not(feature = "debug"))]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => { $crate::__skip!($($arg)+) };
}

#[cfg(feature = "debug")]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => { $crate::__emit!("DEBUG", "245", "245", $($arg)+) };
}

#[cfg(not(feature = "debug"))]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => { $crate::__skip!($($arg)+) };
}

#[cfg(feature = "debug")]
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => { $crate::__emit!("INFO ", "15", "7", $($arg)+) };
}

#[cfg(not(feature = "debug"))]
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => { $crate::__skip!($($arg)+) };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => { $crate::__emit!("WARN ", "11", "228", $($arg)+) };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => { $crate::__emit!("ERROR", "9", "160", $($arg)+) };
}
