//! Script harness for library tests.

use std::sync::{Arc, Mutex};

use crate::script::error::Fault;
use crate::script::interp::{
    Capabilities, Console, Host, Interpreter, InterpreterLimits, Interrupt, Stream,
};
use crate::script::parser::parse_program;

use super::Library;

struct LibraryOnly;

impl Capabilities for LibraryOnly {
    fn operation_allowed(&self, _name: &str) -> bool {
        true
    }

    fn import_allowed(&self, module: &str) -> bool {
        ["numpy", "pandas", "scipy"]
            .iter()
            .any(|root| module == *root || module.starts_with(&format!("{}.", root)))
    }
}

#[derive(Default)]
struct Streams {
    stdout: Mutex<String>,
    stderr: Mutex<String>,
}

impl Console for Streams {
    fn write(&self, stream: Stream, text: &str) -> Result<(), Fault> {
        let buffer = match stream {
            Stream::Stdout => &self.stdout,
            Stream::Stderr => &self.stderr,
        };
        buffer.lock().unwrap().push_str(text);
        Ok(())
    }
}

pub struct Outcome {
    pub result: Result<(), Fault>,
    pub out: Option<serde_json::Value>,
    pub stderr: String,
}

/// Run `source` and read back the global `out`.
pub fn run(source: &str) -> Outcome {
    let streams = Arc::new(Streams::default());
    let host = Host {
        capabilities: Arc::new(LibraryOnly),
        library: Arc::new(Library::standard()),
        console: streams.clone(),
        interrupt: Interrupt::new(),
        limits: InterpreterLimits::default(),
    };
    let mut interp = Interpreter::new(host);
    let program = parse_program(source).unwrap();
    let result = interp.run(&program);
    let out = interp.global("out").map(|v| v.to_json().unwrap());
    let stderr = streams.stderr.lock().unwrap().clone();
    Outcome {
        result,
        out,
        stderr,
    }
}

/// Run `source`, which must succeed, and return `out`.
pub fn out(source: &str) -> serde_json::Value {
    let outcome = run(source);
    if let Err(fault) = outcome.result {
        panic!("script failed: {}", fault);
    }
    outcome.out.expect("script did not set out")
}

/// Run `source`, which must fail with a runtime fault, and return its type name.
pub fn fault_type(source: &str) -> &'static str {
    match run(source).result {
        Err(Fault::Runtime(fault)) => fault.type_name,
        other => panic!("expected a runtime fault, got {:?}", other),
    }
}
