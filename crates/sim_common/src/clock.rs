use std::sync::OnceLock;
use std::time::Instant;

static START: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed on a monotonic clock since the first call in this
/// process.
pub fn milliseconds() -> u64 {
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milliseconds_is_monotonic() {
        let first = milliseconds();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = milliseconds();
        assert!(second >= first + 1);
    }
}
