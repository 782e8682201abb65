//! Calculator tool - basic arithmetic on two numbers

use super::{Tool, ToolContext, ToolOutput};
use crate::state_machine::state::CalculatorInput;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct CalculatorTool;

/// Apply `operation` to the inputs. Errors carry the message the model sees.
fn evaluate(input: &CalculatorInput) -> Result<f64, String> {
    let (a, b) = (input.first_num, input.second_num);
    let result = match input.operation.as_str() {
        "add" => a + b,
        "sub" => a - b,
        "mul" => a * b,
        "div" if b == 0.0 => return Err("Division by zero is not allowed".to_string()),
        "div" => a / b,
        other => return Err(format!("Unsupported operation '{other}'")),
    };
    // JSON has no encoding for infinities
    if result.is_finite() {
        Ok(result)
    } else {
        Err("Result is too large to represent".to_string())
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &'static str {
        "calculator"
    }

    fn description(&self) -> String {
        "Perform a basic arithmetic operation on two numbers. \
         Supported operations: add, sub, mul, div"
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["first_num", "second_num", "operation"],
            "properties": {
                "first_num": {"type": "number"},
                "second_num": {"type": "number"},
                "operation": {
                    "type": "string",
                    "description": "One of add, sub, mul, div"
                }
            }
        })
    }

    async fn run(&self, input: Value, _ctx: ToolContext) -> ToolOutput {
        let input: CalculatorInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::json(false, &json!({"error": e.to_string()})),
        };

        match evaluate(&input) {
            Ok(result) => ToolOutput::json(
                true,
                &json!({
                    "first_num": input.first_num,
                    "second_num": input.second_num,
                    "operation": input.operation,
                    "result": result,
                }),
            ),
            Err(message) => ToolOutput::json(false, &json!({"error": message})),
        }
    }
}
