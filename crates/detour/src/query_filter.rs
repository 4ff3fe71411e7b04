use glam::Vec3;

use crate::{Poly, PolyFlags, DT_MAX_AREAS};

/// Decides which polygons a query may visit and what traversing them costs.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFilter {
    area_cost: [f32; DT_MAX_AREAS],
    include_flags: PolyFlags,
    exclude_flags: PolyFlags,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            area_cost: [1.0; DT_MAX_AREAS],
            include_flags: PolyFlags::ALL,
            exclude_flags: PolyFlags::empty(),
        }
    }
}

impl QueryFilter {
    pub fn new(include_flags: PolyFlags, exclude_flags: PolyFlags) -> Self {
        Self {
            include_flags,
            exclude_flags,
            ..Default::default()
        }
    }

    /// A polygon passes when it shares a flag with the include set and none
    /// with the exclude set.
    #[inline]
    pub fn pass_filter(&self, poly: &Poly) -> bool {
        poly.flags.intersects(self.include_flags) && !poly.flags.intersects(self.exclude_flags)
    }

    /// Cost of moving from `pa` to `pb` across `cur`.
    #[inline]
    pub fn get_cost(&self, pa: Vec3, pb: Vec3, cur: &Poly) -> f32 {
        pa.distance(pb) * self.area_cost[cur.area as usize % DT_MAX_AREAS]
    }

    pub fn area_cost(&self, area: u8) -> f32 {
        self.area_cost[area as usize % DT_MAX_AREAS]
    }

    pub fn set_area_cost(&mut self, area: u8, cost: f32) {
        if (area as usize) < DT_MAX_AREAS {
            self.area_cost[area as usize] = cost;
        }
    }

    pub fn include_flags(&self) -> PolyFlags {
        self.include_flags
    }

    pub fn set_include_flags(&mut self, flags: PolyFlags) {
        self.include_flags = flags;
    }

    pub fn exclude_flags(&self) -> PolyFlags {
        self.exclude_flags
    }

    pub fn set_exclude_flags(&mut self, flags: PolyFlags) {
        self.exclude_flags = flags;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PolyType;

    fn poly(flags: PolyFlags, area: u8) -> Poly {
        Poly {
            flags,
            area,
            poly_type: PolyType::Ground,
            ..Default::default()
        }
    }

    #[test]
    fn test_include_exclude() {
        let filter = QueryFilter::new(PolyFlags::WALK | PolyFlags::SWIM, PolyFlags::DISABLED);
        assert!(filter.pass_filter(&poly(PolyFlags::WALK, 0)));
        assert!(!filter.pass_filter(&poly(PolyFlags::WALK | PolyFlags::DISABLED, 0)));
        assert!(!filter.pass_filter(&poly(PolyFlags::JUMP, 0)));
        assert!(!filter.pass_filter(&poly(PolyFlags::empty(), 0)));
    }

    #[test]
    fn test_area_cost() {
        let mut filter = QueryFilter::default();
        filter.set_area_cost(3, 4.0);
        filter.set_area_cost(200, 9.0);
        let a = Vec3::ZERO;
        let b = Vec3::new(2.0, 0.0, 0.0);
        assert_eq!(filter.get_cost(a, b, &poly(PolyFlags::WALK, 0)), 2.0);
        assert_eq!(filter.get_cost(a, b, &poly(PolyFlags::WALK, 3)), 8.0);
        assert_eq!(filter.area_cost(3), 4.0);
    }
}
