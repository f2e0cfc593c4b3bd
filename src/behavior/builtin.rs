//! Built-in behaviors available to every pipeline file
//!
//! Processors: `identity`, `set_context`, `from_context`, `add`, `subtract`,
//! `multiply`, `divide`. Routers: `goto`, `branch`, `match`, `end`.
//! Predealers: `always`, `context_flag`.

use crate::behavior::{NodeCall, NodeError, NodeRegistry, Output, Predealer, Processor, Router};
use crate::core::Context;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Number, Value};

/// Register every built-in behavior
pub fn register_builtins(registry: &mut NodeRegistry) {
    registry.register_processor("identity", Identity);
    registry.register_processor("set_context", SetContext);
    registry.register_processor("from_context", FromContext);
    registry.register_processor("add", Arithmetic::Add);
    registry.register_processor("subtract", Arithmetic::Subtract);
    registry.register_processor("multiply", Arithmetic::Multiply);
    registry.register_processor("divide", Arithmetic::Divide);

    registry.register_router("goto", Goto);
    registry.register_router("branch", Branch);
    registry.register_router("match", Match);
    registry.register_fn_router("end", |_output, _ctx, _call| Ok(None));

    registry.register_fn_predealer("always", |_input, _ctx, _call| Ok(true));
    registry.register_predealer("context_flag", ContextFlag);
}

/// Pass the input through unchanged
pub struct Identity;

#[async_trait]
impl Processor for Identity {
    async fn execute(&self, input: Value, _context: &mut Context, _call: NodeCall<'_>) -> Result<Output, NodeError> {
        Ok(Output::Value(input))
    }
}

/// Copy every argument into the context and pass the input through
pub struct SetContext;

#[async_trait]
impl Processor for SetContext {
    async fn execute(&self, input: Value, context: &mut Context, call: NodeCall<'_>) -> Result<Output, NodeError> {
        context.merge(call.args);
        Ok(Output::Value(input))
    }
}

/// Output the context value stored under `key`
pub struct FromContext;

#[async_trait]
impl Processor for FromContext {
    async fn execute(&self, _input: Value, context: &mut Context, call: NodeCall<'_>) -> Result<Output, NodeError> {
        let key = call
            .require_arg("key")?
            .as_str()
            .ok_or_else(|| NodeError::new("Argument 'key' must be a string"))?;

        context
            .get(key)
            .cloned()
            .map(Output::Value)
            .ok_or_else(|| NodeError::new(format!("Context has no value for '{}'", key)))
    }
}

/// Numeric processors
///
/// `add`, `subtract` and `multiply` combine the input with the `operand`
/// argument. `divide` computes `dividend / input` when a `dividend` argument
/// is given and `input / operand` otherwise.
#[derive(Debug, Clone, Copy)]
pub enum Arithmetic {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Arithmetic {
    fn apply(self, input: &Value, call: &NodeCall<'_>) -> Result<Value, NodeError> {
        let input = as_number(input, "input")?;
        let result = match self {
            Arithmetic::Add => input + as_number(call.require_arg("operand")?, "operand")?,
            Arithmetic::Subtract => input - as_number(call.require_arg("operand")?, "operand")?,
            Arithmetic::Multiply => input * as_number(call.require_arg("operand")?, "operand")?,
            Arithmetic::Divide => {
                let (dividend, divisor) = match call.arg("dividend") {
                    Some(dividend) => (as_number(dividend, "dividend")?, input),
                    None => (input, as_number(call.require_arg("operand")?, "operand")?),
                };
                if divisor == 0.0 {
                    return Err(NodeError::new("division by zero"));
                }
                dividend / divisor
            }
        };
        to_number(result)
    }
}

#[async_trait]
impl Processor for Arithmetic {
    async fn execute(&self, input: Value, _context: &mut Context, call: NodeCall<'_>) -> Result<Output, NodeError> {
        self.apply(&input, &call).map(Output::Value)
    }
}

fn as_number(value: &Value, what: &str) -> Result<f64, NodeError> {
    value
        .as_f64()
        .ok_or_else(|| NodeError::new(format!("Expected a number for {}, got {}", what, value)))
}

// Integral results stay integers so `20 - 10` prints as `10`, not `10.0`
fn to_number(value: f64) -> Result<Value, NodeError> {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        return Ok(Value::from(value as i64));
    }
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| NodeError::new(format!("Result is not a finite number: {}", value)))
}

/// Jump to the `target` argument; a null target ends the run
pub struct Goto;

#[async_trait]
impl Router for Goto {
    async fn next(&self, _output: &Value, _context: &mut Context, call: NodeCall<'_>) -> Result<Option<String>, NodeError> {
        if !call.args.contains_key("target") {
            return Err(NodeError::new(format!("Missing argument 'target' on node {}", call.node_id)));
        }
        call.node_id_arg("target")
    }
}

/// Go to `then` when the checked value equals `equals`, else to `else`
///
/// The checked value is the node output, or the context entry named by
/// `context_key` when that argument is set. A missing `else` ends the run.
pub struct Branch;

#[async_trait]
impl Router for Branch {
    async fn next(&self, output: &Value, context: &mut Context, call: NodeCall<'_>) -> Result<Option<String>, NodeError> {
        let expected = call.require_arg("equals")?;
        let actual = match call.arg("context_key").and_then(Value::as_str) {
            Some(key) => context.get(key).unwrap_or(&Value::Null),
            None => output,
        };

        if actual == expected {
            call.node_id_arg("then")
        } else {
            call.node_id_arg("else")
        }
    }
}

/// Go to `then` when the output text matches the `pattern` regex, else to `else`
pub struct Match;

#[async_trait]
impl Router for Match {
    async fn next(&self, output: &Value, _context: &mut Context, call: NodeCall<'_>) -> Result<Option<String>, NodeError> {
        let pattern = call
            .require_arg("pattern")?
            .as_str()
            .ok_or_else(|| NodeError::new("Argument 'pattern' must be a string"))?;
        let regex = Regex::new(pattern).map_err(|e| NodeError::new(format!("Invalid pattern '{}': {}", pattern, e)))?;

        let text = match output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        if regex.is_match(&text) {
            call.node_id_arg("then")
        } else {
            call.node_id_arg("else")
        }
    }
}

/// Open the gate when context `key` equals `expect` (default `true`)
pub struct ContextFlag;

#[async_trait]
impl Predealer for ContextFlag {
    async fn pre_deal(&self, _input: &Value, context: &mut Context, call: NodeCall<'_>) -> Result<bool, NodeError> {
        let key = call
            .require_arg("key")?
            .as_str()
            .ok_or_else(|| NodeError::new("Argument 'key' must be a string"))?;
        let expected = call.arg("expect").cloned().unwrap_or(Value::Bool(true));

        Ok(context.get(key) == Some(&expected))
    }
}
