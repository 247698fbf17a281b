//! Bundled tools

use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

use super::expression::evaluate;
use super::{int_arg, number_arg, str_arg, Tool, ToolError, ToolResult};

/// Every bundled tool
pub fn all() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(Calculate),
        Arc::new(IsPrime),
        Arc::new(RollDice),
        Arc::new(AnalyzeText),
        Arc::new(ReverseText),
        Arc::new(ConvertUnits),
        Arc::new(CurrentTime),
    ]
}

// ===== MATH =====

pub struct Calculate;

impl Tool for Calculate {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression (+ - * / % ^ and parentheses)"
    }

    fn category(&self) -> &str {
        "math"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"expression": {"type": "string"}},
            "required": ["expression"],
        })
    }

    fn call(&self, args: &Value) -> ToolResult<Value> {
        let expression = str_arg(args, "expression")?;
        let result = evaluate(expression).map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(json!({"expression": expression, "result": result}))
    }
}

pub struct IsPrime;

/// Witnesses that make Miller-Rabin deterministic for every u64
const MILLER_RABIN_BASES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// Largest divisor searched for when explaining a composite
const DIVISOR_SEARCH_LIMIT: u64 = 10_000;

impl IsPrime {
    fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
        ((a as u128 * b as u128) % m as u128) as u64
    }

    fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
        let mut result = 1u64;
        base %= m;
        while exp > 0 {
            if exp & 1 == 1 {
                result = Self::mul_mod(result, base, m);
            }
            base = Self::mul_mod(base, base, m);
            exp >>= 1;
        }
        result
    }

    pub fn is_prime(n: u64) -> bool {
        if n < 2 {
            return false;
        }
        for p in MILLER_RABIN_BASES {
            if n % p == 0 {
                return n == p;
            }
        }

        let mut d = n - 1;
        let mut r = 0;
        while d % 2 == 0 {
            d /= 2;
            r += 1;
        }

        'witness: for a in MILLER_RABIN_BASES {
            let mut x = Self::pow_mod(a, d, n);
            if x == 1 || x == n - 1 {
                continue;
            }
            for _ in 1..r {
                x = Self::mul_mod(x, x, n);
                if x == n - 1 {
                    continue 'witness;
                }
            }
            return false;
        }
        true
    }

    /// Smallest divisor of `n` greater than one, searched up to a fixed bound
    fn small_divisor(n: u64) -> Option<u64> {
        (2..=DIVISOR_SEARCH_LIMIT)
            .take_while(|i| i * i <= n)
            .find(|i| n % i == 0)
    }
}

impl Tool for IsPrime {
    fn name(&self) -> &str {
        "is_prime"
    }

    fn description(&self) -> &str {
        "Check if a number is prime"
    }

    fn category(&self) -> &str {
        "math"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"number": {"type": "integer"}},
            "required": ["number"],
        })
    }

    fn call(&self, args: &Value) -> ToolResult<Value> {
        let number = int_arg(args, "number", None)?;
        if number < 2 {
            return Ok(json!({
                "number": number,
                "is_prime": false,
                "reason": "Numbers less than 2 are not prime",
            }));
        }

        let n = number as u64;
        if Self::is_prime(n) {
            return Ok(json!({
                "number": number,
                "is_prime": true,
                "reason": format!("{} is prime!", number),
            }));
        }

        let reason = match Self::small_divisor(n) {
            Some(divisor) => format!("{} is divisible by {}", number, divisor),
            None => format!("{} has no divisor below {} but is composite", number, DIVISOR_SEARCH_LIMIT),
        };
        Ok(json!({
            "number": number,
            "is_prime": false,
            "reason": reason,
        }))
    }
}

pub struct RollDice;

const MAX_SIDES: i64 = 1_000_000;

impl Tool for RollDice {
    fn name(&self) -> &str {
        "roll_dice"
    }

    fn description(&self) -> &str {
        "Roll one or more dice with a given number of sides"
    }

    fn category(&self) -> &str {
        "math"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sides": {"type": "integer", "default": 6},
                "count": {"type": "integer", "default": 1},
            },
        })
    }

    fn call(&self, args: &Value) -> ToolResult<Value> {
        let sides = int_arg(args, "sides", Some(6))?;
        let count = int_arg(args, "count", Some(1))?;
        if sides < 2 {
            return Err(ToolError::invalid("sides", "dice must have at least 2 sides"));
        }
        if sides > MAX_SIDES {
            return Err(ToolError::invalid(
                "sides",
                format!("dice cannot have more than {} sides", MAX_SIDES),
            ));
        }
        if count < 1 {
            return Err(ToolError::invalid("count", "must roll at least 1 die"));
        }
        if count > 100 {
            return Err(ToolError::invalid("count", "cannot roll more than 100 dice at once"));
        }

        let mut rng = rand::thread_rng();
        let rolls: Vec<i64> = (0..count).map(|_| rng.gen_range(1..=sides)).collect();
        let total: i64 = rolls.iter().sum();

        Ok(json!({
            "rolls": rolls,
            "total": total,
            "count": count,
            "sides": sides,
            "average": total as f64 / count as f64,
        }))
    }
}

// ===== TEXT =====

pub struct AnalyzeText;

impl Tool for AnalyzeText {
    fn name(&self) -> &str {
        "analyze_text"
    }

    fn description(&self) -> &str {
        "Count characters, words and sentences in a text"
    }

    fn category(&self) -> &str {
        "text"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"],
        })
    }

    fn call(&self, args: &Value) -> ToolResult<Value> {
        let text = str_arg(args, "text")?;
        let words: Vec<&str> = text.split_whitespace().collect();
        let sentences = text.split('.').filter(|s| !s.trim().is_empty()).count();
        let average_word_length = if words.is_empty() {
            0.0
        } else {
            words.iter().map(|w| w.chars().count()).sum::<usize>() as f64 / words.len() as f64
        };
        let unique: HashSet<String> = words.iter().map(|w| w.to_lowercase()).collect();

        Ok(json!({
            "character_count": text.chars().count(),
            "word_count": words.len(),
            "sentence_count": sentences,
            "average_word_length": average_word_length,
            "unique_words": unique.len(),
        }))
    }
}

pub struct ReverseText;

impl Tool for ReverseText {
    fn name(&self) -> &str {
        "reverse_text"
    }

    fn description(&self) -> &str {
        "Reverse text by characters or by words"
    }

    fn category(&self) -> &str {
        "text"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"},
                "by_word": {"type": "boolean", "default": false},
            },
            "required": ["text"],
        })
    }

    fn call(&self, args: &Value) -> ToolResult<Value> {
        let text = str_arg(args, "text")?;
        let by_word = args.get("by_word").and_then(Value::as_bool).unwrap_or(false);
        let reversed = if by_word {
            text.split_whitespace().rev().collect::<Vec<_>>().join(" ")
        } else {
            text.chars().rev().collect()
        };
        Ok(json!({"text": text, "reversed": reversed}))
    }
}

// ===== CONVERSION =====

pub struct ConvertUnits;

impl ConvertUnits {
    fn convert(value: f64, from: &str, to: &str) -> Option<f64> {
        let converted = match (from, to) {
            ("celsius", "fahrenheit") => value * 9.0 / 5.0 + 32.0,
            ("fahrenheit", "celsius") => (value - 32.0) * 5.0 / 9.0,
            ("meters", "feet") => value * 3.28084,
            ("feet", "meters") => value / 3.28084,
            ("kilograms", "pounds") => value * 2.20462,
            ("pounds", "kilograms") => value / 2.20462,
            ("kilometers", "miles") => value * 0.621371,
            ("miles", "kilometers") => value / 0.621371,
            _ => return None,
        };
        Some(converted)
    }

    /// Canonical plural unit name for common spellings
    pub fn normalize(unit: &str) -> String {
        let unit = unit.trim().to_lowercase();
        match unit.as_str() {
            "c" | "°c" => "celsius".to_string(),
            "f" | "°f" => "fahrenheit".to_string(),
            "m" | "meter" | "metre" | "metres" => "meters".to_string(),
            "ft" | "foot" => "feet".to_string(),
            "kg" | "kilogram" => "kilograms".to_string(),
            "lb" | "lbs" | "pound" => "pounds".to_string(),
            "km" | "kilometer" | "kilometre" | "kilometres" => "kilometers".to_string(),
            "mi" | "mile" => "miles".to_string(),
            _ => unit,
        }
    }
}

impl Tool for ConvertUnits {
    fn name(&self) -> &str {
        "convert_units"
    }

    fn description(&self) -> &str {
        "Convert temperatures, lengths and weights between units"
    }

    fn category(&self) -> &str {
        "conversion"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "value": {"type": "number"},
                "from_unit": {"type": "string"},
                "to_unit": {"type": "string"},
            },
            "required": ["value", "from_unit", "to_unit"],
        })
    }

    fn call(&self, args: &Value) -> ToolResult<Value> {
        let value = number_arg(args, "value", None)?;
        let from_unit = str_arg(args, "from_unit")?;
        let to_unit = str_arg(args, "to_unit")?;

        let converted = Self::convert(value, &Self::normalize(from_unit), &Self::normalize(to_unit))
            .ok_or_else(|| {
                ToolError::Execution(format!(
                    "Conversion from {} to {} not supported",
                    from_unit, to_unit
                ))
            })?;

        Ok(json!({
            "original_value": value,
            "original_unit": from_unit,
            "converted_value": converted,
            "converted_unit": to_unit,
        }))
    }
}

// ===== TIME =====

pub struct CurrentTime;

impl Tool for CurrentTime {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time in UTC"
    }

    fn category(&self) -> &str {
        "time"
    }

    fn call(&self, _args: &Value) -> ToolResult<Value> {
        let now = chrono::Utc::now();
        Ok(json!({
            "timestamp": now.to_rfc3339(),
            "date": now.format("%Y-%m-%d").to_string(),
            "time": now.format("%H:%M:%S").to_string(),
            "timezone": "UTC",
        }))
    }
}
