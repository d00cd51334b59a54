//! Engine configuration
//!
//! Builder-style options threaded into [`crate::Engine`] at construction.

/// Execution options.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Disassemble each instruction as it executes (trace level logging).
    pub trace_execution: bool,
    /// Collect on every allocation instead of waiting for the threshold.
    /// Slow; exists to shake out missing GC roots.
    pub stress_gc: bool,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace_execution(mut self, on: bool) -> Self {
        self.trace_execution = on;
        self
    }

    pub fn with_stress_gc(mut self, on: bool) -> Self {
        self.stress_gc = on;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = EngineConfig::new().with_trace_execution(true).with_stress_gc(true);
        assert!(config.trace_execution);
        assert!(config.stress_gc);
        let config = EngineConfig::new();
        assert!(!config.trace_execution);
        assert!(!config.stress_gc);
    }
}
