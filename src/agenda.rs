use crate::models::{Activity, ActivityId};
use chrono::NaiveDate;
use std::cmp::Ordering;

/// Display order: earlier instants first, higher priority first on ties.
///
/// Records whose date or time cannot be read sort after every readable one.
pub fn compare_activities(left: &Activity, right: &Activity) -> Ordering {
    match (left.instant(), right.instant()) {
        (Some(a), Some(b)) => a
            .cmp(&b)
            .then_with(|| right.priority.rank().cmp(&left.priority.rank())),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => right.priority.rank().cmp(&left.priority.rank()),
    }
}

/// Sorts in place. The sort is stable, so equal keys keep storage order.
pub fn order_activities(activities: &mut [Activity]) {
    activities.sort_by(compare_activities);
}

pub fn ordered(mut activities: Vec<Activity>) -> Vec<Activity> {
    order_activities(&mut activities);
    activities
}

pub fn activities_on(activities: &[Activity], date: NaiveDate) -> Vec<Activity> {
    ordered(
        activities
            .iter()
            .filter(|activity| activity.date_value() == Some(date))
            .cloned()
            .collect(),
    )
}

pub fn find_index(activities: &[Activity], id: ActivityId) -> Option<usize> {
    activities.iter().position(|activity| activity.id == id)
}
