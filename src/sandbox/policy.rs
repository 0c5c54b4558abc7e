//! Capability policy: which primitive operations and library imports a
//! script may resolve.
//!
//! The policy is a closed allowlist. Anything not granted is refused; there is
//! no deny list. It is built once and shared read-only across executions.

use std::collections::BTreeSet;

use crate::script::Capabilities;

/// Primitive operations granted by [`CapabilityPolicy::standard`].
pub const STANDARD_OPERATIONS: &[&str] = &[
    "abs", "all", "any", "bool", "dict", "enumerate", "float", "int", "len", "list", "max", "min",
    "print", "range", "round", "sorted", "str", "sum", "zip",
];

/// Library namespaces granted by [`CapabilityPolicy::standard`], together with
/// their dotted submodules.
pub const STANDARD_IMPORTS: &[&str] = &["numpy", "pandas", "scipy"];

/// Operation and import allowlist.
///
/// An import is allowed when the module name equals a granted namespace or
/// extends one with a dotted suffix (`scipy` admits `scipy.stats`).
#[derive(Debug, Clone, Default)]
pub struct CapabilityPolicy {
    operations: BTreeSet<String>,
    imports: BTreeSet<String>,
}

impl CapabilityPolicy {
    /// Empty policy: nothing is allowed.
    pub fn new() -> Self {
        Self::default()
    }

    /// The service's fixed allowlist.
    pub fn standard() -> Self {
        let mut policy = Self::new();
        for name in STANDARD_OPERATIONS {
            policy.grant_operation(name);
        }
        for module in STANDARD_IMPORTS {
            policy.grant_import(module);
        }
        policy
    }

    pub fn grant_operation(&mut self, name: &str) {
        self.operations.insert(name.to_string());
    }

    pub fn grant_import(&mut self, module: &str) {
        self.imports.insert(module.to_string());
    }

    pub fn is_operation_allowed(&self, name: &str) -> bool {
        self.operations.contains(name)
    }

    pub fn is_import_allowed(&self, module: &str) -> bool {
        if module.is_empty() || module.split('.').any(str::is_empty) {
            return false;
        }
        self.imports.iter().any(|granted| {
            module == granted
                || module
                    .strip_prefix(granted.as_str())
                    .map_or(false, |rest| rest.starts_with('.'))
        })
    }

    /// Granted operations, sorted.
    pub fn allowed_operations(&self) -> Vec<String> {
        self.operations.iter().cloned().collect()
    }

    /// Granted import roots, sorted.
    pub fn allowed_imports(&self) -> Vec<String> {
        self.imports.iter().cloned().collect()
    }
}

impl Capabilities for CapabilityPolicy {
    fn operation_allowed(&self, name: &str) -> bool {
        self.is_operation_allowed(name)
    }

    fn import_allowed(&self, module: &str) -> bool {
        self.is_import_allowed(module)
    }
}
