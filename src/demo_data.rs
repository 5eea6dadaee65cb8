//! Demo data generators for nurse scheduling.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{
    Level, LeaveRequest, Period, ShiftCatalog, ShiftCode, SpecialStatus, StaffMember, WardStaffingPolicy,
};
use crate::engine::{FixedAssignment, SchedulingProblem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoData {
    Small,
    Large,
}

impl std::str::FromStr for DemoData {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SMALL" => Ok(DemoData::Small),
            "LARGE" => Ok(DemoData::Large),
            _ => Err(()),
        }
    }
}

impl DemoData {
    pub fn as_str(&self) -> &'static str {
        match self {
            DemoData::Small => "SMALL",
            DemoData::Large => "LARGE",
        }
    }

    fn parameters(&self) -> DemoDataParameters {
        match self {
            DemoData::Small => DemoDataParameters {
                ward: "ICU-A",
                staff_count: 12,
                min_per_shift: [3, 2, 2],
                max_per_shift: [None, None, None],
                min_working_days: 15,
                target_working_days: 20,
                max_working_days: 22,
                min_senior_per_shift: 1,
                level_distribution: vec![(0, 2.0), (1, 3.0), (2, 3.0), (3, 2.0), (4, 1.0)],
                leave_count_distribution: vec![(0, 3.0), (1, 2.0), (2, 2.0), (3, 1.0)],
                protected_count: 2,
            },
            DemoData::Large => DemoDataParameters {
                ward: "MED-3",
                staff_count: 30,
                min_per_shift: [6, 5, 4],
                max_per_shift: [Some(8), Some(7), Some(5)],
                min_working_days: 15,
                target_working_days: 19,
                max_working_days: 22,
                min_senior_per_shift: 2,
                level_distribution: vec![(0, 3.0), (1, 4.0), (2, 3.0), (3, 2.0), (4, 1.0)],
                leave_count_distribution: vec![(0, 2.0), (2, 3.0), (4, 2.0), (6, 1.0)],
                protected_count: 3,
            },
        }
    }
}

struct DemoDataParameters {
    ward: &'static str,
    staff_count: usize,
    /// Day, evening, night.
    min_per_shift: [usize; 3],
    max_per_shift: [Option<usize>; 3],
    min_working_days: u32,
    target_working_days: u32,
    max_working_days: u32,
    min_senior_per_shift: usize,
    level_distribution: Vec<(usize, f64)>,
    leave_count_distribution: Vec<(usize, f64)>,
    protected_count: usize,
}

/// List of available demo data sets.
pub fn list_demo_data() -> Vec<&'static str> {
    vec!["SMALL", "LARGE"]
}

/// Generates a demo ward for March 2024.
pub fn generate(demo: DemoData) -> SchedulingProblem {
    let params = demo.parameters();
    let mut rng = StdRng::seed_from_u64(0);
    let period = Period::month(2024, 2).unwrap_or_else(|| unreachable!("March is a valid month"));

    let name_permutations = generate_name_permutations(&mut rng);
    const LEVELS: [Level; 5] = [Level::N0, Level::N1, Level::N2, Level::N3, Level::N4];

    // The first nurse is the head nurse; the rest draw a level.
    let mut staff: Vec<StaffMember> = (0..params.staff_count)
        .map(|i| {
            let level = if i == 0 {
                Level::N4
            } else {
                LEVELS[pick_weighted(&mut rng, &params.level_distribution)]
            };
            StaffMember::new(format!("n{:02}", i + 1), level)
                .with_name(name_permutations[i % name_permutations.len()].clone())
        })
        .collect();
    for (i, member) in staff.iter_mut().enumerate() {
        member.seniority = match member.level {
            Level::N0 => 0,
            Level::N1 => 1,
            Level::N2 => 3,
            Level::N3 => 6,
            Level::N4 => 10,
        } + (i as u32 % 3);
        member.annual_leave = 7 + member.seniority.min(23);
    }

    // Protected statuses go to junior staff so senior night cover stays possible.
    let juniors: Vec<usize> = (1..staff.len()).filter(|&i| !staff[i].level.is_senior()).collect();
    for (n, &idx) in juniors.iter().take(params.protected_count).enumerate() {
        let status = if n % 2 == 0 {
            SpecialStatus::Pregnant
        } else {
            SpecialStatus::Nursing
        };
        staff[idx].special_status = status;
    }

    let days: Vec<u32> = (1..=period.days()).collect();
    let mut leave_requests = Vec::new();
    for member in staff.iter().skip(1) {
        let count = pick_weighted(&mut rng, &params.leave_count_distribution);
        if count == 0 {
            continue;
        }
        leave_requests.push(LeaveRequest {
            staff_id: member.id.clone(),
            days: days.choose_multiple(&mut rng, count).copied().collect(),
        });
    }

    // One nurse with status "other" avoids evenings by arrangement.
    let mut forbidden_overrides: BTreeMap<String, BTreeSet<ShiftCode>> = BTreeMap::new();
    if let Some(member) = staff
        .iter_mut()
        .skip(1)
        .find(|m| m.special_status == SpecialStatus::None && !m.level.is_senior())
    {
        member.special_status = SpecialStatus::Other;
        forbidden_overrides.insert(member.id.clone(), [ShiftCode::Evening].into_iter().collect());
    }

    // Head nurse works the first weekdays on the day shift.
    let pre_assigned = (1..=5)
        .filter_map(|day| period.date(day))
        .map(|date| FixedAssignment::new(staff[0].id.clone(), date, ShiftCode::Day))
        .collect();

    let policy = WardStaffingPolicy {
        min_per_shift: ShiftCode::ALL.into_iter().zip(params.min_per_shift).collect(),
        max_per_shift: ShiftCode::ALL
            .into_iter()
            .zip(params.max_per_shift)
            .filter_map(|(code, max)| max.map(|m| (code, m)))
            .collect(),
        min_working_days: params.min_working_days,
        target_working_days: params.target_working_days,
        max_working_days: params.max_working_days,
        min_senior_per_shift: params.min_senior_per_shift,
    };

    SchedulingProblem {
        ward: params.ward.to_string(),
        period,
        staff,
        shift_types: ShiftCatalog::standard().iter().copied().collect(),
        policy,
        leave_requests,
        forbidden_overrides,
        pre_assigned,
        history: Vec::new(),
    }
}

/// Pick a value based on weighted distribution.
fn pick_weighted(rng: &mut StdRng, distribution: &[(usize, f64)]) -> usize {
    let total_weight: f64 = distribution.iter().map(|(_, w)| w).sum();
    let mut choice = rng.gen::<f64>() * total_weight;

    for (value, weight) in distribution {
        if choice < *weight {
            return *value;
        }
        choice -= weight;
    }
    distribution.last().map(|(v, _)| *v).unwrap_or(0)
}

const FIRST_NAMES: &[&str] = &[
    "Amy", "Beth", "Chen", "Dana", "Elsa", "Flo", "Grace", "Hui", "Ivy", "Jun",
];
const LAST_NAMES: &[&str] = &[
    "Chang", "Fox", "Huang", "Jones", "Kao", "Li", "Lin", "Wang", "Smith", "Wu",
];

fn generate_name_permutations(rng: &mut StdRng) -> Vec<String> {
    let mut names = Vec::with_capacity(FIRST_NAMES.len() * LAST_NAMES.len());
    for first in FIRST_NAMES {
        for last in LAST_NAMES {
            names.push(format!("{} {}", first, last));
        }
    }
    names.shuffle(rng);
    names
}
