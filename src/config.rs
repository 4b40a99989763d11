//! Runtime and per-instance configuration.

/// Runtime-wide configuration, shared by every module compiled through one
/// [`crate::Runtime`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Size in bytes of the guest stack allocated per invocation.
    pub guest_stack_size: usize,
    /// Emit a stack-bound check in the prologue of every function that
    /// allocates frame space or makes calls. Also serves as the external
    /// stop gate.
    pub stack_checks: bool,
    /// Run the SSA verifier after construction and between passes.
    pub verify_ssa: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            guest_stack_size: 512 * 1024,
            stack_checks: true,
            verify_ssa: cfg!(debug_assertions),
        }
    }
}

impl Config {
    pub fn guest_stack_size(mut self, bytes: usize) -> Self {
        self.guest_stack_size = bytes;
        self
    }

    pub fn stack_checks(mut self, enabled: bool) -> Self {
        self.stack_checks = enabled;
        self
    }

    pub fn verify_ssa(mut self, enabled: bool) -> Self {
        self.verify_ssa = enabled;
        self
    }
}

/// Per-instantiation configuration.
#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    /// Instance name, used for diagnostics only.
    pub name: Option<String>,
}

impl ModuleConfig {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
