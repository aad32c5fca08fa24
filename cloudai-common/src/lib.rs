pub mod config;
pub mod error;
pub mod model;
pub mod tracing_config;

#[cfg(test)]
test_r::enable!();

/// Renders a value for operator-facing logs without leaking secrets.
///
/// Implemented by config structs and service errors alike, mirroring the
/// split between `Display` (user-facing) and this trait (safe-for-logs).
pub trait SafeDisplay {
    fn to_safe_string(&self) -> String;

    fn to_safe_string_indented(&self) -> String {
        self.to_safe_string()
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
