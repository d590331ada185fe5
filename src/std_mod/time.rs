use std::time::{SystemTime, UNIX_EPOCH};

use crate::objects::object::NativeObject;
use crate::value::{make_number_value, Value};

/// `clock()`: seconds since the Unix epoch, as a number.
pub struct ClockTime;

impl ClockTime {
    pub fn new() -> ClockTime {
        ClockTime
    }
}

impl NativeObject for ClockTime {
    fn run(&self, _args: &[Value]) -> Result<Value, String> {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|error| format!("clock went backwards: {}", error))?;
        Ok(make_number_value(elapsed.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{as_number, is_number};

    #[test]
    fn test_clock_yields_a_positive_number() {
        let clock = ClockTime::new();
        let value = clock.run(&[]).expect("clock should not fail");
        assert!(is_number(&value));
        assert!(as_number(&value) > 0.0);
    }
}
