use std::time::Duration;

/// An endless sequence of retry delays, growing by a constant factor from
/// `start` until they reach `max`, and staying at `max` from then on. Use
/// `take` to bound the number of attempts.
///
pub struct ExponentialBackoff {
    next: Duration,
    max: Duration,
    factor: u32,
}

impl ExponentialBackoff {
    pub fn new(start: Duration, max: Duration, factor: u32) -> Self {
        Self {
            next: start.min(max),
            max,
            factor,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next;
        self.next = (self.next * self.factor).min(self.max);
        Some(current)
    }
}

/// Runs a fallible operation once per delay of an iterator, sleeping for
/// the delay after each failure except the last. The `on_err` callback sees
/// every error before the sleep, which is where callers log. Returns the
/// first success, or the last error once the delays run out, or `None` if
/// there were no delays at all.
///
pub trait Retry: Iterator<Item = Duration> + Sized {
    fn retry<F, S, T, E>(self, mut f: F, on_err: S) -> Option<Result<T, E>>
    where
        F: FnMut() -> Result<T, E>,
        S: Fn(&E, Duration),
    {
        let mut last = None;
        let mut delays = self.peekable();

        while let Some(delay) = delays.next() {
            match f() {
                Ok(value) => return Some(Ok(value)),
                Err(e) => {
                    if delays.peek().is_some() {
                        on_err(&e, delay);
                        std::thread::sleep(delay);
                    }
                    last = Some(Err(e));
                }
            }
        }
        last
    }
}

impl<I: Iterator<Item = Duration>> Retry for I {}
