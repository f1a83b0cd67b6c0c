use crate::models::ClassSchedule;

/// Decides how many spots a class still has.
///
/// Bookings are not counted against capacity anywhere, so the default keeps
/// the nominal figure. Deployments that want a stricter rule plug in their own.
pub trait CapacityEstimator: Send + Sync {
    fn spots_left(&self, schedule: &ClassSchedule) -> u32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NominalCapacity;

impl CapacityEstimator for NominalCapacity {
    fn spots_left(&self, schedule: &ClassSchedule) -> u32 {
        schedule.capacity
    }
}

impl<F> CapacityEstimator for F
where
    F: Fn(&ClassSchedule) -> u32 + Send + Sync,
{
    fn spots_left(&self, schedule: &ClassSchedule) -> u32 {
        self(schedule)
    }
}
