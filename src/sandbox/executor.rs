//! Execution worker: run one script to completion on the calling thread.
//!
//! The dispatcher owns timing; this module only guarantees that every exit
//! path, including a panic inside the interpreter, becomes an [`Outcome`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::capture::CaptureBuffers;
use super::environment::{Bindings, ExecutionEnvironment};
use super::marshal::Outcome;
use super::request::ExecutionRequest;
use crate::script::{parse_program, Interrupt};
use crate::types::ExecutionLimits;

/// Parse, bind and run `request`. Blocks until the script stops.
pub fn execute(
    request: &ExecutionRequest,
    bindings: &Bindings,
    limits: &ExecutionLimits,
    capture: Arc<CaptureBuffers>,
    interrupt: Interrupt,
) -> Outcome {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        run(request, bindings, limits, capture, interrupt)
    }));
    match result {
        Ok(outcome) => outcome,
        Err(payload) => Outcome::Internal(format!("worker panicked: {}", panic_message(&*payload))),
    }
}

fn run(
    request: &ExecutionRequest,
    bindings: &Bindings,
    limits: &ExecutionLimits,
    capture: Arc<CaptureBuffers>,
    interrupt: Interrupt,
) -> Outcome {
    let program = match parse_program(&request.code) {
        Ok(program) => program,
        Err(err) => return Outcome::Syntax(err),
    };

    let mut env =
        ExecutionEnvironment::new(bindings, capture, interrupt, limits, &request.input_data);
    if let Err(fault) = env.run(&program) {
        return Outcome::Faulted(fault);
    }
    match env.output_data() {
        Ok(output) => Outcome::Completed(output),
        Err(err) => Outcome::Unserializable(err),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Fault;
    use serde_json::json;

    fn run_script(code: &str, input: serde_json::Value) -> (Outcome, Arc<CaptureBuffers>) {
        let capture = Arc::new(CaptureBuffers::new(4096, false));
        let request = ExecutionRequest {
            code: code.to_string(),
            input_data: input,
        };
        let outcome = execute(
            &request,
            &Bindings::standard(),
            &ExecutionLimits::default(),
            capture.clone(),
            Interrupt::new(),
        );
        (outcome, capture)
    }

    #[test]
    fn test_completed_with_output() {
        let (outcome, capture) = run_script("print('hi')\noutput_data = [{'x': 1}]", json!([]));
        assert!(matches!(outcome, Outcome::Completed(ref v) if *v == json!([{"x": 1}])));
        assert_eq!(capture.snapshot().stdout, "hi\n");
    }

    #[test]
    fn test_syntax_error_is_not_run() {
        let (outcome, capture) = run_script("print('x')\nx = = 1", json!([]));
        assert!(matches!(outcome, Outcome::Syntax(ref e) if e.line == 2));
        assert_eq!(capture.snapshot().stdout, "");
    }

    #[test]
    fn test_capability_violation() {
        let (outcome, _) = run_script("import os", json!([]));
        assert!(matches!(outcome, Outcome::Faulted(Fault::Capability(ref n)) if n == "os"));

        let (outcome, _) = run_script("open('/etc/passwd')", json!([]));
        assert!(matches!(outcome, Outcome::Faulted(Fault::Capability(ref n)) if n == "open"));
    }

    #[test]
    fn test_non_finite_output_is_unserializable() {
        use crate::script::JsonError;
        let (outcome, _) = run_script("output_data = float('inf')", json!([]));
        assert!(matches!(outcome, Outcome::Unserializable(JsonError::NonFinite)));

        let (outcome, _) = run_script("import numpy as np\noutput_data = [np.mean([])]", json!([]));
        assert!(matches!(outcome, Outcome::Unserializable(JsonError::NonFinite)));
    }

    #[test]
    fn test_deep_output_is_unserializable() {
        let code = "a = []\nfor i in range(200000):\n    a = [a]\noutput_data = a\nprint(a)";
        let (outcome, capture) = run_script(code, json!([]));
        assert!(matches!(outcome, Outcome::Unserializable(crate::script::JsonError::TooDeep)));
        assert!(capture.snapshot().stdout.starts_with("[[["));
    }

    #[test]
    fn test_pre_triggered_interrupt_stops_script() {
        let capture = Arc::new(CaptureBuffers::new(64, false));
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let request = ExecutionRequest {
            code: "while True:\n    pass".into(),
            input_data: json!([]),
        };
        let outcome = execute(
            &request,
            &Bindings::standard(),
            &ExecutionLimits::default(),
            capture,
            interrupt,
        );
        assert!(matches!(outcome, Outcome::Faulted(Fault::Interrupted)));
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
    }
}
