//! Maximum-information item selection.

use std::collections::HashSet;

use crate::cat::irt::fisher_information;
use crate::model::{Dimension, TestItem};

/// Information multiplier for items whose parameters are not yet calibrated
/// from field data. Preliminary items win only when their claimed
/// information is meaningfully higher than calibrated alternatives.
pub const PRELIMINARY_DISCOUNT: f64 = 0.5;

/// Pick the next item for a session: the not-yet-administered item of the
/// requested dimension with the highest (discounted) Fisher information at
/// the current ability estimate.
///
/// Ties break first-seen, so two calls with equal inputs return the same
/// item. Returns `None` when no candidate remains.
pub fn select_next<'a, I>(
    theta: f64,
    pool: I,
    administered: &HashSet<String>,
    dimension: Dimension,
) -> Option<&'a TestItem>
where
    I: IntoIterator<Item = &'a TestItem>,
{
    let mut best: Option<(&TestItem, f64)> = None;
    for item in pool {
        if item.dimension != dimension || administered.contains(&item.id) {
            continue;
        }
        let mut info = fisher_information(theta, &item.params);
        if item.preliminary {
            info *= PRELIMINARY_DISCOUNT;
        }
        let replace = match best {
            None => true,
            Some((_, best_info)) => info > best_info,
        };
        if replace {
            best = Some((item, info));
        }
    }
    best.map(|(item, _)| item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemParams;

    fn item(id: &str, dimension: Dimension, difficulty: f64) -> TestItem {
        TestItem::new(id, dimension, ItemParams::new(1.5, difficulty, 0.0))
    }

    #[test]
    fn picks_item_closest_to_current_ability() {
        let pool = vec![
            item("far-low", Dimension::Functional, -2.0),
            item("near", Dimension::Functional, 0.1),
            item("far-high", Dimension::Functional, 2.0),
        ];
        let chosen = select_next(0.0, &pool, &HashSet::new(), Dimension::Functional).unwrap();
        assert_eq!(chosen.id, "near");
    }

    #[test]
    fn never_repeats_an_administered_item() {
        let pool = vec![
            item("a", Dimension::Security, 0.0),
            item("b", Dimension::Security, 0.3),
        ];
        let mut administered = HashSet::new();
        administered.insert("a".to_string());
        let chosen = select_next(0.0, &pool, &administered, Dimension::Security).unwrap();
        assert_eq!(chosen.id, "b");

        administered.insert("b".to_string());
        assert!(select_next(0.0, &pool, &administered, Dimension::Security).is_none());
    }

    #[test]
    fn filters_by_dimension() {
        let pool = vec![
            item("sec", Dimension::Security, 0.0),
            item("fun", Dimension::Functional, 0.0),
        ];
        let chosen = select_next(0.0, &pool, &HashSet::new(), Dimension::Functional).unwrap();
        assert_eq!(chosen.id, "fun");
        assert!(select_next(0.0, &pool, &HashSet::new(), Dimension::Robustness).is_none());
    }

    #[test]
    fn prefers_calibrated_twin_over_preliminary() {
        // Identical parameters, one preliminary: the calibrated item's
        // undiscounted information is 100% ≥ 50% of the preliminary one's.
        let calibrated = item("calibrated", Dimension::Fairness, 0.0);
        let preliminary = item("preliminary", Dimension::Fairness, 0.0).preliminary(true);
        let pool = vec![preliminary, calibrated];
        let chosen = select_next(0.0, &pool, &HashSet::new(), Dimension::Fairness).unwrap();
        assert_eq!(chosen.id, "calibrated");
    }

    #[test]
    fn preliminary_item_wins_when_markedly_more_informative() {
        let dull = item("dull", Dimension::Fairness, 3.5);
        let sharp = TestItem::new(
            "sharp",
            Dimension::Fairness,
            ItemParams::new(2.5, 0.0, 0.0),
        )
        .preliminary(true);
        let pool = vec![dull, sharp];
        let chosen = select_next(0.0, &pool, &HashSet::new(), Dimension::Fairness).unwrap();
        assert_eq!(chosen.id, "sharp");
    }

    #[test]
    fn ties_break_first_seen() {
        let pool = vec![
            item("first", Dimension::Performance, 0.5),
            item("twin", Dimension::Performance, 0.5),
        ];
        for _ in 0..3 {
            let chosen = select_next(0.0, &pool, &HashSet::new(), Dimension::Performance).unwrap();
            assert_eq!(chosen.id, "first");
        }
    }
}
