use std::time::Instant;

pub struct ScopedTimer {
    name: &'static str,
    start: Instant,
    level: log::Level,
}

impl ScopedTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
            level: log::Level::Info,
        }
    }

    /// Timer for hot paths; reports at debug level.
    pub fn quiet(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
            level: log::Level::Debug,
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        log::log!(self.level, "{} took {:?}", self.name, self.start.elapsed());
    }
}
