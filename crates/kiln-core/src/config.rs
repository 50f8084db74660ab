/// Engine-wide configuration shared by the Kiln crates.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub benchmark: BenchmarkMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BenchmarkMode {
    /// Benchmarking is disabled
    #[default]
    Off,
    /// Frame scopes are recorded and can be inspected in-process
    On,
    /// Frame scopes are recorded and served to external tools such as `puffin_viewer`
    WithWebserver,
}

impl BenchmarkMode {
    /// Whether profiling scopes should be recorded at all.
    pub fn is_enabled(self) -> bool {
        !matches!(self, BenchmarkMode::Off)
    }
}
