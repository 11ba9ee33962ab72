//! Generation of trace numbers for outgoing requests.
//!

use rand::Rng;

/// Width of a generated trace number.
pub const TRACE_NUMBER_WIDTH: usize = 6;

/// Generate a random, zero-padded trace number in `000001..=999999`.
pub fn generate_trace_number() -> String {
    let number = rand::thread_rng().gen_range(1..1_000_000_u32);
    format!("{number:0>TRACE_NUMBER_WIDTH$}")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trace_numbers_are_padded() {
        for _ in 0..256 {
            let trace = generate_trace_number();
            assert_eq!(trace.len(), TRACE_NUMBER_WIDTH);
            assert!(trace.bytes().all(|b| b.is_ascii_digit()));
            assert_ne!(trace, "000000");
        }
    }
}
