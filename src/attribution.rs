use std::collections::BTreeMap;

use crate::model::{Pharmacy, ProductFound, UserProfile};

/// Credits every rep covering a line item's line at this pharmacy with the full
/// line value. Lines no rep covers credit nobody.
pub fn resolve_rep_rewards(
    pharmacy: &Pharmacy,
    reps: &[UserProfile],
    items: &[ProductFound],
) -> BTreeMap<String, i64> {
    let mut rewards = BTreeMap::new();
    for item in items.iter().filter(|i| i.points > 0) {
        for rep in reps {
            let covers_line = pharmacy
                .rep_assignments
                .get(&rep.id)
                .is_some_and(|lines| lines.iter().any(|l| *l == item.line));
            if covers_line {
                *rewards.entry(rep.id.clone()).or_insert(0) += item.points;
            }
        }
    }
    rewards
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use std::collections::HashMap;

    fn rep(id: &str) -> UserProfile {
        UserProfile {
            id: id.into(),
            role: Role::SalesRep,
            pharmacy_id: None,
            assigned_pharmacies: vec!["ph1".into()],
        }
    }

    fn item(line: &str, points: i64) -> ProductFound {
        ProductFound {
            name: format!("{line}-product"),
            quantity: 1.0,
            unit_price: 10.0,
            commission_pct: 10.0,
            points,
            line: line.into(),
        }
    }

    fn pharmacy(assignments: &[(&str, &[&str])]) -> Pharmacy {
        Pharmacy {
            id: "ph1".into(),
            name: "Farmacia Uno".into(),
            rep_assignments: assignments
                .iter()
                .map(|(rep, lines)| (rep.to_string(), lines.iter().map(|l| l.to_string()).collect()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn every_matching_rep_gets_full_credit() {
        let ph = pharmacy(&[("repA", &["OTC"]), ("repB", &["OTC"])]);
        let rewards = resolve_rep_rewards(&ph, &[rep("repA"), rep("repB")], &[item("OTC", 20)]);
        assert_eq!(rewards.get("repA"), Some(&20));
        assert_eq!(rewards.get("repB"), Some(&20));
    }

    #[test]
    fn uncovered_lines_credit_nobody() {
        let ph = pharmacy(&[("repA", &["Genericos"])]);
        let rewards = resolve_rep_rewards(&ph, &[rep("repA")], &[item("OTC", 20)]);
        assert!(rewards.is_empty());
    }

    #[test]
    fn reps_without_assignment_here_get_nothing() {
        let ph = pharmacy(&[("repA", &["OTC"])]);
        let rewards = resolve_rep_rewards(&ph, &[rep("repA"), rep("repZ")], &[item("OTC", 7)]);
        assert_eq!(rewards.len(), 1);
        assert_eq!(rewards["repA"], 7);
    }

    #[test]
    fn credits_accumulate_across_lines_and_skip_zero_items() {
        let ph = pharmacy(&[("repA", &["OTC", "General"]), ("repB", &["General"])]);
        let rewards = resolve_rep_rewards(
            &ph,
            &[rep("repA"), rep("repB")],
            &[item("OTC", 5), item("General", 3), item("General", 0)],
        );
        assert_eq!(rewards["repA"], 8);
        assert_eq!(rewards["repB"], 3);
    }
}
