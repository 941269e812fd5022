//! Resource vectors.

use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// A resource quantity in CPU milli-units, memory bytes and GPUs.
///
/// The same type describes a request, a node capacity and a node's current
/// usage. Components are signed: a trial allocation may drive a vector
/// negative before it is rolled back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub cpu_millis: i64,
    pub memory_bytes: i64,
    pub gpu: i64,
}

impl Dimensions {
    pub const ZERO: Dimensions = Dimensions {
        cpu_millis: 0,
        memory_bytes: 0,
        gpu: 0,
    };

    pub const fn new(cpu_millis: i64, memory_bytes: i64, gpu: i64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
            gpu,
        }
    }

    /// Returns true if every component of `self` is at least the matching
    /// component of `request`.
    pub fn satisfies(&self, request: &Dimensions) -> bool {
        self.cpu_millis >= request.cpu_millis
            && self.memory_bytes >= request.memory_bytes
            && self.gpu >= request.gpu
    }

    /// Returns true if no component is negative.
    pub fn is_non_negative(&self) -> bool {
        self.satisfies(&Dimensions::ZERO)
    }

    /// Replaces negative components with zero.
    pub fn clamp_non_negative(self) -> Self {
        Self {
            cpu_millis: self.cpu_millis.max(0),
            memory_bytes: self.memory_bytes.max(0),
            gpu: self.gpu.max(0),
        }
    }

    /// The vector multiplied by a replica count.
    pub fn times(self, count: u32) -> Self {
        let count = i64::from(count);
        Self {
            cpu_millis: self.cpu_millis * count,
            memory_bytes: self.memory_bytes * count,
            gpu: self.gpu * count,
        }
    }

    /// Component-wise maximum.
    pub fn component_max(self, other: Dimensions) -> Self {
        Self {
            cpu_millis: self.cpu_millis.max(other.cpu_millis),
            memory_bytes: self.memory_bytes.max(other.memory_bytes),
            gpu: self.gpu.max(other.gpu),
        }
    }

    /// Component-wise minimum.
    pub fn component_min(self, other: Dimensions) -> Self {
        Self {
            cpu_millis: self.cpu_millis.min(other.cpu_millis),
            memory_bytes: self.memory_bytes.min(other.memory_bytes),
            gpu: self.gpu.min(other.gpu),
        }
    }
}

impl Add for Dimensions {
    type Output = Dimensions;

    fn add(self, rhs: Dimensions) -> Dimensions {
        Dimensions {
            cpu_millis: self.cpu_millis + rhs.cpu_millis,
            memory_bytes: self.memory_bytes + rhs.memory_bytes,
            gpu: self.gpu + rhs.gpu,
        }
    }
}

impl AddAssign for Dimensions {
    fn add_assign(&mut self, rhs: Dimensions) {
        *self = *self + rhs;
    }
}

impl Sub for Dimensions {
    type Output = Dimensions;

    fn sub(self, rhs: Dimensions) -> Dimensions {
        Dimensions {
            cpu_millis: self.cpu_millis - rhs.cpu_millis,
            memory_bytes: self.memory_bytes - rhs.memory_bytes,
            gpu: self.gpu - rhs.gpu,
        }
    }
}

impl SubAssign for Dimensions {
    fn sub_assign(&mut self, rhs: Dimensions) {
        *self = *self - rhs;
    }
}

impl Sum for Dimensions {
    fn sum<I: Iterator<Item = Dimensions>>(iter: I) -> Dimensions {
        iter.fold(Dimensions::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Dimensions> for Dimensions {
    fn sum<I: Iterator<Item = &'a Dimensions>>(iter: I) -> Dimensions {
        iter.copied().sum()
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cpu={}m mem={}B gpu={}",
            self.cpu_millis, self.memory_bytes, self.gpu
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_satisfies_requires_every_component() {
        let node = Dimensions::new(4000, 1024, 1);

        assert!(node.satisfies(&Dimensions::new(4000, 1024, 1)));
        assert!(node.satisfies(&Dimensions::new(1000, 0, 0)));
        assert!(!node.satisfies(&Dimensions::new(1000, 0, 2)));
        assert!(!node.satisfies(&Dimensions::new(4001, 0, 0)));
    }

    #[test]
    fn test_subtract_may_go_negative() {
        let mut remaining = Dimensions::new(1000, 0, 0);
        remaining -= Dimensions::new(2000, 0, 0);

        assert_eq!(remaining.cpu_millis, -1000);
        assert!(!remaining.is_non_negative());
        assert_eq!(remaining.clamp_non_negative(), Dimensions::ZERO);
    }

    #[test]
    fn test_times_scales_every_component() {
        let request = Dimensions::new(500, 2048, 1);
        assert_eq!(request.times(3), Dimensions::new(1500, 6144, 3));
    }

    #[test]
    fn test_component_bounds() {
        let a = Dimensions::new(3000, 10, 0);
        let b = Dimensions::new(1000, 20, 2);

        assert_eq!(a.component_max(b), Dimensions::new(3000, 20, 2));
        assert_eq!(a.component_min(b), Dimensions::new(1000, 10, 0));
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(Dimensions::new(1, 2, 3)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"cpu_millis": 1, "memory_bytes": 2, "gpu": 3})
        );
    }

    proptest! {
        #[test]
        fn prop_trial_allocation_reverts(
            cpu in 0i64..1_000_000,
            mem in 0i64..1_000_000,
            gpu in 0i64..16,
            req_cpu in 0i64..1_000_000,
            req_mem in 0i64..1_000_000,
            req_gpu in 0i64..16,
        ) {
            let original = Dimensions::new(cpu, mem, gpu);
            let request = Dimensions::new(req_cpu, req_mem, req_gpu);

            let mut remaining = original;
            remaining -= request;
            remaining += request;

            prop_assert_eq!(remaining, original);
            prop_assert_eq!((original - request).is_non_negative(), original.satisfies(&request));
        }
    }
}
