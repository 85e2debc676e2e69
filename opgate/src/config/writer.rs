//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let timeout_ms = config
        .executor
        .operation_timeout
        .map(|t| t.as_millis())
        .unwrap_or(0);

    format!(
        r#"[executor]
; Maximum operations whose bodies may run at once.
; Half-duplex peripherals should use 1.
max_concurrent_operations = {}
; Default wait timeout in milliseconds for execute (0 = wait indefinitely).
; A timeout leaves the device state unknown; reconnect after one.
operation_timeout_ms = {}
; Status code the driver reports on success (decimal or 0x-prefixed hex).
success_status = {}

[logging]
; Directory for log files
directory = {}
; Log file name (cleared at the start of each session)
file = {}
"#,
        config.executor.max_concurrent_operations,
        timeout_ms,
        config.executor.success_status,
        config.logging.directory.to_string_lossy(),
        config.logging.file,
    )
}
