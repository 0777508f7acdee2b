//! Classifies registered interactions into intermediate/final stages and
//! routes channel activity to cell lists (spec.md §4.5). The numerics of
//! an individual pair interaction are an external collaborator (spec.md
//! §1); this manager only ever touches a registered interaction through
//! its declared channel dependencies, its cutoff, and its `run_local`/
//! `run_halo` entry points.

use std::collections::{HashMap, HashSet};

use crate::channels::StreamToken;
use crate::error::{ConfigurationError, CoreError};
use crate::named::Named;

/// Which stage of the per-step pipeline an output channel belongs to
/// (spec.md §3, §4.5): `Intermediate` fields (e.g. density) are
/// consumed by other interactions on the same step; `Final` fields
/// (forces/stresses) are consumed by integrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Intermediate,
    Final,
}

/// A black-box pair interaction, characterised only by its channel
/// dependencies and cutoff radius (spec.md §1). `run_local`/`run_halo`
/// are invoked by the manager at the appropriate point in the step;
/// what they actually compute is outside this crate's concern.
pub trait Interaction: Named {
    fn cutoff(&self) -> f64;
    /// Channels this interaction reads, produced by an earlier
    /// intermediate interaction on the same PV pair.
    fn reads(&self) -> &[String];
    /// Channels this interaction writes, tagged by the stage they
    /// belong to.
    fn writes(&self) -> &[(String, Stage)];

    fn run_local(&self, pv1: &str, pv2: &str, stream: StreamToken);
    fn run_halo(&self, pv1: &str, pv2: &str, stream: StreamToken);
}

struct Registered {
    interaction: Box<dyn Interaction>,
    pv1: String,
    pv2: String,
}

/// Classifies registered interactions, selects the best-fit cell list
/// per `(PV, cutoff)` pair, and owns the invariant that every
/// consumer's input is produced and gathered before consumption
/// (spec.md §4.5).
#[derive(Default)]
pub struct InteractionManager {
    registered: Vec<Registered>,
}

impl InteractionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an interaction bound to `(pv1, pv2)`. Rejects, at
    /// registration time, two interactions on the same PV pair
    /// declaring an overlapping writer channel (spec.md §9, Open
    /// Question resolved in DESIGN.md: reject rather than silently
    /// permit).
    pub fn register(
        &mut self,
        interaction: Box<dyn Interaction>,
        pv1: impl Into<String>,
        pv2: impl Into<String>,
    ) -> Result<(), CoreError> {
        let pv1 = pv1.into();
        let pv2 = pv2.into();
        let writes: HashSet<&str> = interaction.writes().iter().map(|(n, _)| n.as_str()).collect();
        for existing in &self.registered {
            let same_pair = (existing.pv1 == pv1 && existing.pv2 == pv2) || (existing.pv1 == pv2 && existing.pv2 == pv1);
            if !same_pair {
                continue;
            }
            for (name, _) in existing.interaction.writes() {
                if writes.contains(name.as_str()) {
                    return Err(CoreError::Configuration(ConfigurationError::OverlappingWriterChannel {
                        a: existing.interaction.name().to_string(),
                        b: interaction.name().to_string(),
                        pv1: pv1.clone(),
                        pv2: pv2.clone(),
                        channel: name.clone(),
                    }));
                }
            }
        }
        self.registered.push(Registered { interaction, pv1, pv2 });
        Ok(())
    }

    fn of_stage(&self, stage: Stage) -> impl Iterator<Item = &Registered> {
        self.registered
            .iter()
            .filter(move |r| r.interaction.writes().iter().any(|(_, s)| *s == stage))
    }

    pub fn execute_local_intermediate(&self, stream: StreamToken) {
        for r in self.of_stage(Stage::Intermediate) {
            r.interaction.run_local(&r.pv1, &r.pv2, stream);
        }
    }

    pub fn execute_halo_intermediate(&self, stream: StreamToken) {
        for r in self.of_stage(Stage::Intermediate) {
            r.interaction.run_halo(&r.pv1, &r.pv2, stream);
        }
    }

    pub fn execute_local_final(&self, stream: StreamToken) {
        for r in self.of_stage(Stage::Final) {
            r.interaction.run_local(&r.pv1, &r.pv2, stream);
        }
    }

    pub fn execute_halo_final(&self, stream: StreamToken) {
        for r in self.of_stage(Stage::Final) {
            r.interaction.run_halo(&r.pv1, &r.pv2, stream);
        }
    }

    /// All cutoffs declared by interactions bound to `pv`, on either
    /// side of the pair (spec.md §4.7 phase 2 input).
    pub fn cutoffs_for_pv(&self, pv: &str) -> Vec<f64> {
        self.registered
            .iter()
            .filter(|r| r.pv1 == pv || r.pv2 == pv)
            .map(|r| r.interaction.cutoff())
            .collect()
    }

    /// Effective cutoff for `pv`: the maximum across intermediate and
    /// final stages, which bounds the halo thickness (spec.md §4.5).
    pub fn effective_cutoff(&self, pv: &str) -> Option<f64> {
        self.cutoffs_for_pv(pv).into_iter().fold(None, |acc, c| match acc {
            None => Some(c),
            Some(a) if c > a => Some(c),
            Some(a) => Some(a),
        })
    }

    /// Distinct channel names interactions bound to `pv` write in the
    /// given stage (spec.md §4.5 `accumulateIntermediates`/
    /// `accumulateFinal` input).
    pub fn write_channel_names(&self, pv: &str, stage: Stage) -> Vec<String> {
        let mut names: Vec<String> = self
            .registered
            .iter()
            .filter(|r| r.pv1 == pv || r.pv2 == pv)
            .flat_map(|r| r.interaction.writes().iter().filter(|(_, s)| *s == stage).map(|(n, _)| n.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Distinct channel names interactions bound to `pv` read, regardless
    /// of stage (spec.md §4.5 `gatherIntermediate` input: the channels a
    /// final-stage interaction needs pushed into its own cell list).
    pub fn read_channel_names(&self, pv: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .registered
            .iter()
            .filter(|r| r.pv1 == pv || r.pv2 == pv)
            .flat_map(|r| r.interaction.reads().iter().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Producer/consumer map used to assert that every consumer's input
    /// channel was produced by some registered intermediate interaction
    /// (spec.md §4.5 invariant; exercised by the "density gathered
    /// before final executes" test in spec.md §8 scenario 6).
    pub fn producers_of(&self, channel: &str) -> Vec<&str> {
        self.registered
            .iter()
            .filter(|r| r.interaction.writes().iter().any(|(n, s)| n == channel && *s == Stage::Intermediate))
            .map(|r| r.interaction.name())
            .collect()
    }

    pub fn channels_read(&self) -> HashMap<String, Vec<&str>> {
        let mut map: HashMap<String, Vec<&str>> = HashMap::new();
        for r in &self.registered {
            for name in r.interaction.reads() {
                map.entry(name.clone()).or_default().push(r.interaction.name());
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Spy {
        name: String,
        cutoff: f64,
        reads: Vec<String>,
        writes: Vec<(String, Stage)>,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Named for Spy {
        fn name(&self) -> &str {
            &self.name
        }
    }

    impl Interaction for Spy {
        fn cutoff(&self) -> f64 {
            self.cutoff
        }
        fn reads(&self) -> &[String] {
            &self.reads
        }
        fn writes(&self) -> &[(String, Stage)] {
            &self.writes
        }
        fn run_local(&self, _pv1: &str, _pv2: &str, _stream: StreamToken) {
            self.log.borrow_mut().push(format!("local:{}", self.name));
        }
        fn run_halo(&self, _pv1: &str, _pv2: &str, _stream: StreamToken) {
            self.log.borrow_mut().push(format!("halo:{}", self.name));
        }
    }

    #[test]
    fn intermediate_runs_before_final_in_pipeline_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut mgr = InteractionManager::new();
        mgr.register(
            Box::new(Spy {
                name: "density".into(),
                cutoff: 1.0,
                reads: vec![],
                writes: vec![("density".into(), Stage::Intermediate)],
                log: log.clone(),
            }),
            "water",
            "water",
        )
        .unwrap();
        mgr.register(
            Box::new(Spy {
                name: "pressure".into(),
                cutoff: 1.0,
                reads: vec!["density".into()],
                writes: vec![("force".into(), Stage::Final)],
                log: log.clone(),
            }),
            "water",
            "water",
        )
        .unwrap();

        mgr.execute_local_intermediate(StreamToken::default());
        mgr.execute_local_final(StreamToken::default());

        assert_eq!(*log.borrow(), vec!["local:density", "local:pressure"]);
        assert_eq!(mgr.producers_of("density"), vec!["density"]);
    }

    #[test]
    fn overlapping_writer_channels_rejected() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut mgr = InteractionManager::new();
        mgr.register(
            Box::new(Spy {
                name: "a".into(),
                cutoff: 1.0,
                reads: vec![],
                writes: vec![("force".into(), Stage::Final)],
                log: log.clone(),
            }),
            "water",
            "water",
        )
        .unwrap();
        let err = mgr.register(
            Box::new(Spy {
                name: "b".into(),
                cutoff: 1.0,
                reads: vec![],
                writes: vec![("force".into(), Stage::Final)],
                log,
            }),
            "water",
            "water",
        );
        assert!(err.is_err());
    }

    #[test]
    fn effective_cutoff_is_max_across_stages() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut mgr = InteractionManager::new();
        mgr.register(
            Box::new(Spy {
                name: "a".into(),
                cutoff: 1.0,
                reads: vec![],
                writes: vec![("density".into(), Stage::Intermediate)],
                log: log.clone(),
            }),
            "water",
            "water",
        )
        .unwrap();
        mgr.register(
            Box::new(Spy {
                name: "b".into(),
                cutoff: 2.5,
                reads: vec![],
                writes: vec![("force".into(), Stage::Final)],
                log,
            }),
            "water",
            "water",
        )
        .unwrap();
        assert_eq!(mgr.effective_cutoff("water"), Some(2.5));
    }
}
