/// Domain-aware logging macros.
///
/// Each macro injects a `domain` field automatically so call sites never
/// repeat the string literal. Domains: `sys` (lifecycle), `store` (Redis
/// I/O), `cycle` (scheduler/evaluator), `res` (metrics/resources), `conf`
/// (configuration and rule compilation).
///
/// # Usage
///
/// ```ignore
/// bcn_info!(sys, rules = 4, layers = 2, "engine bootstrap complete");
/// bcn_warn!(cycle, elapsed_ms = 130, "cycle overrun");
/// ```

#[doc(hidden)]
macro_rules! bcn_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

/// Log at ERROR level with an automatic `domain` field.
macro_rules! bcn_error {
    ($domain:ident, $($rest:tt)*) => {
        bcn_log!(error, $domain, $($rest)*)
    };
}

/// Log at WARN level with an automatic `domain` field.
macro_rules! bcn_warn {
    ($domain:ident, $($rest:tt)*) => {
        bcn_log!(warn, $domain, $($rest)*)
    };
}

/// Log at INFO level with an automatic `domain` field.
macro_rules! bcn_info {
    ($domain:ident, $($rest:tt)*) => {
        bcn_log!(info, $domain, $($rest)*)
    };
}

/// Log at DEBUG level with an automatic `domain` field.
macro_rules! bcn_debug {
    ($domain:ident, $($rest:tt)*) => {
        bcn_log!(debug, $domain, $($rest)*)
    };
}
