//! Per-call execution environment.

use std::sync::Arc;

use serde_json::Value as Json;

use super::policy::CapabilityPolicy;
use crate::script::ast::Program;
use crate::script::{
    Console, Fault, Host, Interpreter, InterpreterLimits, Interrupt, JsonError, Library, Value,
};
use crate::types::ExecutionLimits;

pub const INPUT_BINDING: &str = "input_data";
pub const OUTPUT_BINDING: &str = "output_data";

/// Library names pre-bound in every environment, with the module each aliases.
const LIBRARY_ALIASES: &[(&str, &str)] = &[
    ("np", "numpy"),
    ("numpy", "numpy"),
    ("pd", "pandas"),
    ("pandas", "pandas"),
    ("scipy", "scipy"),
];

/// Immutable binding table built once at service start.
#[derive(Debug, Clone)]
pub struct Bindings {
    pub policy: Arc<CapabilityPolicy>,
    pub library: Arc<Library>,
}

impl Bindings {
    pub fn new(policy: CapabilityPolicy, library: Library) -> Self {
        Self {
            policy: Arc::new(policy),
            library: Arc::new(library),
        }
    }

    pub fn standard() -> Self {
        Self::new(CapabilityPolicy::standard(), Library::standard())
    }
}

impl Default for Bindings {
    fn default() -> Self {
        Self::standard()
    }
}

/// A fresh, capability-restricted namespace for one script run.
///
/// Owns its interpreter; dropping the environment tears the interpreter down,
/// so nothing a script allocated outlives the call.
pub struct ExecutionEnvironment {
    interp: Interpreter,
}

impl ExecutionEnvironment {
    pub fn new(
        bindings: &Bindings,
        console: Arc<dyn Console>,
        interrupt: Interrupt,
        limits: &ExecutionLimits,
        input_data: &Json,
    ) -> Self {
        let host = Host {
            capabilities: bindings.policy.clone(),
            library: bindings.library.clone(),
            console,
            interrupt,
            limits: InterpreterLimits {
                max_call_depth: limits.max_call_depth,
                max_collection_len: limits.max_collection_len,
                max_live_elements: limits.max_live_elements,
            },
        };
        let mut interp = Interpreter::new(host);

        for (alias, module) in LIBRARY_ALIASES {
            if !bindings.policy.is_import_allowed(module) {
                continue;
            }
            if let Some(library_module) = bindings.library.module(module) {
                interp.set_global(alias, Value::Module(library_module));
            }
        }

        // Two independent deep copies: mutating one is never visible through
        // the other, nor to the caller.
        let input = Value::from_json(input_data, interp.heap());
        let output = Value::from_json(input_data, interp.heap());
        interp.set_global(INPUT_BINDING, input);
        interp.set_global(OUTPUT_BINDING, output);

        Self { interp }
    }

    pub fn run(&mut self, program: &Program) -> Result<(), Fault> {
        self.interp.run(program)
    }

    /// Current `output_data`, converted for the response.
    pub fn output_data(&self) -> Result<Json, JsonError> {
        match self.interp.global(OUTPUT_BINDING) {
            Some(value) => value.to_json(),
            None => Ok(Json::Null),
        }
    }
}

impl std::fmt::Debug for ExecutionEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEnvironment").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::capture::CaptureBuffers;
    use crate::script::parse_program;
    use serde_json::json;

    fn environment(input: &Json) -> ExecutionEnvironment {
        ExecutionEnvironment::new(
            &Bindings::standard(),
            Arc::new(CaptureBuffers::new(1024, false)),
            Interrupt::new(),
            &ExecutionLimits::default(),
            input,
        )
    }

    #[test]
    fn test_output_echoes_input_by_default() {
        let input = json!([{"a": 1}, {"a": 2, "b": "x"}]);
        let mut env = environment(&input);
        env.run(&parse_program("total = len(input_data)").unwrap()).unwrap();
        assert_eq!(env.output_data().unwrap(), input);
    }

    #[test]
    fn test_input_and_output_are_separate_copies() {
        let input = json!([{"a": 1}]);
        let mut env = environment(&input);
        env.run(&parse_program("input_data[0]['a'] = 99\ninput_data.append({})").unwrap())
            .unwrap();
        assert_eq!(env.output_data().unwrap(), input);
    }

    #[test]
    fn test_library_aliases_are_bound() {
        let mut env = environment(&json!([]));
        env.run(&parse_program("output_data = [np.mean([1, 3]), pd.isna(None), len(scipy.stats.zscore([1, 2]))]").unwrap())
            .unwrap();
        assert_eq!(env.output_data().unwrap(), json!([2.0, true, 2]));
    }

    #[test]
    fn test_aliases_follow_policy() {
        let mut policy = CapabilityPolicy::new();
        policy.grant_import("numpy");
        let bindings = Bindings::new(policy, Library::standard());
        let mut env = ExecutionEnvironment::new(
            &bindings,
            Arc::new(CaptureBuffers::new(1024, false)),
            Interrupt::new(),
            &ExecutionLimits::default(),
            &json!([]),
        );
        env.run(&parse_program("output_data = np.pi > 3").unwrap()).unwrap();
        let result = env.run(&parse_program("x = pd").unwrap());
        assert!(matches!(result, Err(Fault::Runtime(f)) if f.type_name == "NameError"));
    }

    #[test]
    fn test_unserializable_output() {
        let mut env = environment(&json!([]));
        env.run(&parse_program("output_data = len").unwrap()).unwrap();
        assert!(env.output_data().is_err());
    }
}
