//! Resource accounting for the interpreter.
//!
//! The heap reports every allocation and release to a [`ResourceTracker`], the
//! dispatch loop polls it for time limits at each instruction boundary and the
//! call binder asks it whether another frame may be pushed. `NoLimitTracker`
//! is the default and compiles the checks down to almost nothing.

use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::exception_private::{ExcType, RunError, SimpleException};

/// Frame depth allowed when no explicit limit is configured.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// A resource limit was hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// More heap objects than `max_allocations` were requested.
    Allocation { limit: usize, count: usize },
    /// The estimated live heap size went over `max_memory`.
    Memory { limit: usize, used: usize },
    /// Execution ran longer than `max_duration`.
    Time { limit: Duration, elapsed: Duration },
    /// Frame nesting went deeper than `max_recursion_depth`.
    Recursion { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => write!(f, "allocation limit exceeded: {count} > {limit}"),
            Self::Memory { limit, used } => write!(f, "memory limit exceeded: {used} bytes > {limit} bytes"),
            Self::Time { limit, elapsed } => write!(f, "time limit exceeded: {elapsed:.2?} > {limit:.2?}"),
            Self::Recursion { .. } => f.write_str("maximum recursion depth exceeded"),
        }
    }
}

impl std::error::Error for ResourceError {}

impl From<ResourceError> for RunError {
    /// Resource errors surface as ordinary program exceptions so they unwind
    /// through `finally` blocks like any other raise.
    fn from(err: ResourceError) -> Self {
        let exc_type = match err {
            ResourceError::Allocation { .. } | ResourceError::Memory { .. } => ExcType::MemoryError,
            ResourceError::Time { .. } => ExcType::TimeoutError,
            ResourceError::Recursion { .. } => ExcType::RuntimeError,
        };
        SimpleException::new_msg(exc_type, err.to_string()).into()
    }
}

/// Hooks the interpreter calls to enforce resource limits.
///
/// Size callbacks are closures so trackers that don't care about memory never
/// pay for the estimate.
pub trait ResourceTracker: fmt::Debug {
    /// Called before a heap object is created.
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError>;

    /// Called after a heap object is freed.
    fn on_free(&mut self, get_size: impl FnOnce() -> usize);

    /// Called at every instruction boundary.
    fn check_time(&self) -> Result<(), ResourceError>;

    /// Called before a new frame starts running at `depth` (1 for the module frame).
    fn check_recursion_depth(&self, depth: usize) -> Result<(), ResourceError>;
}

/// Tracker that never fails apart from the default recursion depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_allocate(&mut self, _get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn on_free(&mut self, _get_size: impl FnOnce() -> usize) {}

    #[inline]
    fn check_time(&self) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn check_recursion_depth(&self, depth: usize) -> Result<(), ResourceError> {
        if depth > DEFAULT_MAX_RECURSION_DEPTH {
            Err(ResourceError::Recursion {
                limit: DEFAULT_MAX_RECURSION_DEPTH,
                depth,
            })
        } else {
            Ok(())
        }
    }
}

/// Configuration for [`LimitedTracker`].
///
/// ```
/// use std::time::Duration;
/// use ceval::ResourceLimits;
///
/// let limits = ResourceLimits::new()
///     .max_allocations(10_000)
///     .max_duration(Duration::from_millis(250))
///     .max_recursion_depth(Some(64));
/// assert_eq!(limits.recursion_depth(), 64);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    max_allocations: Option<usize>,
    max_memory: Option<usize>,
    max_duration: Option<Duration>,
    max_recursion_depth: Option<usize>,
}

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the total number of heap objects created over a run.
    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    /// Caps the estimated size in bytes of live heap objects.
    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = Some(limit);
        self
    }

    /// Caps wall-clock execution time, measured from tracker creation.
    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    /// Caps frame nesting; `None` restores [`DEFAULT_MAX_RECURSION_DEPTH`].
    #[must_use]
    pub fn max_recursion_depth(mut self, limit: Option<usize>) -> Self {
        self.max_recursion_depth = limit;
        self
    }

    /// The effective recursion limit.
    #[must_use]
    pub fn recursion_depth(&self) -> usize {
        self.max_recursion_depth.unwrap_or(DEFAULT_MAX_RECURSION_DEPTH)
    }
}

/// Tracker enforcing a [`ResourceLimits`] configuration.
#[derive(Debug)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    started: Instant,
    allocations: usize,
    memory: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            started: Instant::now(),
            allocations: 0,
            memory: 0,
        }
    }

    /// Total allocations seen so far.
    #[must_use]
    pub fn allocations(&self) -> usize {
        self.allocations
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        if let Some(limit) = self.limits.max_allocations {
            if self.allocations >= limit {
                return Err(ResourceError::Allocation {
                    limit,
                    count: self.allocations + 1,
                });
            }
        }
        if let Some(limit) = self.limits.max_memory {
            let used = self.memory + get_size();
            if used > limit {
                return Err(ResourceError::Memory { limit, used });
            }
            self.memory = used;
        }
        self.allocations += 1;
        Ok(())
    }

    fn on_free(&mut self, get_size: impl FnOnce() -> usize) {
        if self.limits.max_memory.is_some() {
            self.memory = self.memory.saturating_sub(get_size());
        }
    }

    fn check_time(&self) -> Result<(), ResourceError> {
        if let Some(limit) = self.limits.max_duration {
            let elapsed = self.started.elapsed();
            if elapsed > limit {
                return Err(ResourceError::Time { limit, elapsed });
            }
        }
        Ok(())
    }

    fn check_recursion_depth(&self, depth: usize) -> Result<(), ResourceError> {
        let limit = self.limits.recursion_depth();
        if depth > limit {
            Err(ResourceError::Recursion { limit, depth })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_limit_counts_every_object() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().max_allocations(2));
        assert!(tracker.on_allocate(|| 8).is_ok());
        assert!(tracker.on_allocate(|| 8).is_ok());
        let err = tracker.on_allocate(|| 8).unwrap_err();
        assert_eq!(err, ResourceError::Allocation { limit: 2, count: 3 });
    }

    #[test]
    fn memory_is_returned_on_free() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().max_memory(16));
        tracker.on_allocate(|| 16).unwrap();
        assert!(tracker.on_allocate(|| 1).is_err());
        tracker.on_free(|| 16);
        assert!(tracker.on_allocate(|| 1).is_ok());
    }

    #[test]
    fn recursion_limit_defaults() {
        let tracker = NoLimitTracker;
        assert!(tracker.check_recursion_depth(DEFAULT_MAX_RECURSION_DEPTH).is_ok());
        assert!(tracker.check_recursion_depth(DEFAULT_MAX_RECURSION_DEPTH + 1).is_err());

        let limited = LimitedTracker::new(ResourceLimits::new().max_recursion_depth(Some(3)));
        assert!(limited.check_recursion_depth(3).is_ok());
        assert!(limited.check_recursion_depth(4).is_err());
    }
}
