//! Instance configuration matcher.
//!
//! Every template that accepts the requested label is a candidate; one is
//! picked uniformly at random so sustained demand spreads over all of them.

use std::sync::Arc;

use fleet_core::{LabelExpr, WorkerTemplate};
use rand::Rng;
use rand::seq::IndexedRandom;

/// All templates that can serve `label`, in configuration order.
pub fn matching_templates(
    templates: &[Arc<WorkerTemplate>],
    label: &LabelExpr,
) -> Vec<Arc<WorkerTemplate>> {
    templates
        .iter()
        .filter(|t| t.accepts(label))
        .cloned()
        .collect()
}

/// Pick one template for `label`, or `None` when nothing matches.
pub fn select_template<R: Rng + ?Sized>(
    templates: &[Arc<WorkerTemplate>],
    label: &LabelExpr,
    rng: &mut R,
) -> Option<Arc<WorkerTemplate>> {
    matching_templates(templates, label).choose(rng).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::LabelMode;
    use fleet_core::fixtures::template;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    fn templates(specs: &[(&str, &str)]) -> Vec<Arc<WorkerTemplate>> {
        specs
            .iter()
            .map(|(d, l)| Arc::new(template(d, l)))
            .collect()
    }

    #[test]
    fn never_returns_a_non_matching_template() {
        let ts = templates(&[("linux", "build linux"), ("win", "build windows"), ("gpu", "gpu")]);
        let mut rng = StdRng::seed_from_u64(1);
        let label = LabelExpr::atom("linux");

        for _ in 0..100 {
            let t = select_template(&ts, &label, &mut rng).unwrap();
            assert!(t.labels.is_empty() || t.labels.contains("linux"));
            assert_eq!(t.description, "linux");
        }
    }

    #[test]
    fn no_match_is_none() {
        let mut ts = templates(&[("linux", "linux")]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(select_template(&ts, &LabelExpr::atom("macos"), &mut rng).is_none());

        Arc::make_mut(&mut ts[0]).mode = LabelMode::Exclusive;
        assert!(select_template(&ts, &LabelExpr::Any, &mut rng).is_none());
        assert!(select_template(&[], &LabelExpr::Any, &mut rng).is_none());
    }

    #[test]
    fn unlabeled_template_serves_any_label() {
        let ts = templates(&[("generic", "")]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(select_template(&ts, &LabelExpr::atom("anything"), &mut rng).is_some());
    }

    #[test]
    fn selection_spreads_across_candidates() {
        let ts = templates(&[("a", "build"), ("b", "build"), ("c", "build")]);
        let mut rng = StdRng::seed_from_u64(42);
        let picked: HashSet<String> = (0..60)
            .filter_map(|_| select_template(&ts, &LabelExpr::atom("build"), &mut rng))
            .map(|t| t.description.clone())
            .collect();
        assert_eq!(picked.len(), 3);
    }

    #[test]
    fn matching_templates_keeps_config_order() {
        let ts = templates(&[("a", "build"), ("b", "test"), ("c", "build")]);
        let names: Vec<_> = matching_templates(&ts, &LabelExpr::atom("build"))
            .iter()
            .map(|t| t.description.clone())
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }
}
