use glam::DVec3;

use crate::cells::{best_fit_cutoff, deduplicate_cutoffs, CellList, CellListRole};
use crate::channels::StreamToken;
use crate::checkpoint::Checkpointable;
use crate::communication::{Fragment, NeighbourTopology};
use crate::error::{ConfigurationError, CoreError};
use crate::exchange::helper::ExchangeHelper;
use crate::exchange::{
    ExchangeEngine, ObjectHaloExchanger, ObjectRedistributor, ObjectReverseExchanger, ParticleExchanger,
    ParticleHaloExchanger, ParticleRedistributor,
};
use crate::interactions::Stage;

use super::Simulation;

/// Task names in the canonical per-step graph (spec.md §4.6). Fewer
/// than the ≈45 the full spec describes, since most entries there are
/// per-(PV,cutoff) or per-(interaction-pair) instances; the categories
/// are all represented here and `create_tasks_and_build_dependencies`
/// instantiates one of each category that has registered components.
mod names {
    pub const BUILD_CELL_LISTS: &str = "build_cell_lists";
    pub const CLEAR_INTERMEDIATE: &str = "clear_intermediate_channels";
    pub const PARTICLE_HALO_INIT: &str = "particle_halo_init";
    pub const PARTICLE_HALO_FINALIZE: &str = "particle_halo_finalize";
    pub const OBJECT_HALO_INIT: &str = "object_halo_init";
    pub const OBJECT_HALO_FINALIZE: &str = "object_halo_finalize";
    pub const LOCAL_INTERMEDIATE: &str = "execute_local_intermediate";
    pub const HALO_INTERMEDIATE: &str = "execute_halo_intermediate";
    pub const ACCUMULATE_INTERMEDIATE: &str = "accumulate_and_gather_intermediate";
    pub const CLEAR_FINAL: &str = "clear_final_channels";
    pub const LOCAL_FINAL: &str = "execute_local_final";
    pub const HALO_FINAL: &str = "execute_halo_final";
    pub const ACCUMULATE_FINAL: &str = "accumulate_final";
    pub const OBJECT_REVERSE_INTERMEDIATE: &str = "object_reverse_exchange_intermediate";
    pub const OBJECT_REVERSE_FINAL: &str = "object_reverse_exchange_final";
    pub const INTEGRATE: &str = "integrate";
    pub const WALL_BOUNCE: &str = "wall_bounce";
    pub const OBJECT_LOCAL_BOUNCE: &str = "object_local_bounce";
    pub const OBJECT_HALO_BOUNCE: &str = "object_halo_bounce";
    pub const PARTICLE_REDISTRIBUTE: &str = "particle_redistribute";
    pub const OBJECT_REDISTRIBUTE: &str = "object_redistribute";
    pub const PLUGIN_BEFORE_CELL_LISTS: &str = "plugin_before_cell_lists";
    pub const PLUGIN_BEFORE_FORCES: &str = "plugin_before_forces";
    pub const PLUGIN_SERIALIZE_AND_SEND: &str = "plugin_serialize_and_send";
    pub const PLUGIN_BEFORE_INTEGRATION: &str = "plugin_before_integration";
    pub const PLUGIN_AFTER_INTEGRATION: &str = "plugin_after_integration";
    pub const PLUGIN_BEFORE_PARTICLE_DISTRIBUTION: &str = "plugin_before_particle_distribution";
    pub const WALL_INTEGRITY_CHECK: &str = "wall_integrity_check";
    pub const CHECKPOINT: &str = "checkpoint";
}
use names::*;

fn noop() -> crate::scheduler::TaskFn {
    Box::new(|_stream| Ok(()))
}

impl Simulation {
    /// Phase 2 (spec.md §4.7): gather, per PV, the multiset of cutoffs
    /// its bound interactions declare, dedupe within tolerance, and
    /// build one cell list per distinct cutoff. The largest cutoff's
    /// list is primary for a plain PV (it reorders local storage); an
    /// object vector's lists are always secondary, since reordering
    /// individual particles would break object contiguity.
    pub fn prepare_cell_lists(&mut self, tolerance: f64) -> Result<(), CoreError> {
        self.cell_lists.clear();
        let pv_names: Vec<String> = self.particle_vectors.keys().cloned().collect();
        for pv_name in pv_names {
            let cutoffs = deduplicate_cutoffs(self.interactions.cutoffs_for_pv(&pv_name), tolerance);
            let local_size = self.state.domain.local_size;
            for (i, cutoff) in cutoffs.into_iter().enumerate() {
                let role = if i == 0 { CellListRole::Primary } else { CellListRole::Secondary };
                self.cell_lists.push(CellList::new(pv_name.clone(), cutoff, local_size, role));
            }
        }
        let ov_names: Vec<String> = self.object_vectors.keys().cloned().collect();
        for ov_name in ov_names {
            let cutoffs = deduplicate_cutoffs(self.interactions.cutoffs_for_pv(&ov_name), tolerance);
            let local_size = self.state.domain.local_size;
            for cutoff in cutoffs {
                self.cell_lists
                    .push(CellList::new(ov_name.clone(), cutoff, local_size, CellListRole::Secondary));
            }
        }
        Ok(())
    }

    /// Phase 3 (spec.md §4.7): verify every interaction's declared
    /// cutoff has a suitable cell list to run against.
    pub fn prepare_interactions(&mut self, tolerance: f64) -> Result<(), CoreError> {
        let available: Vec<f64> = self.cell_lists.iter().map(|c| c.cutoff).collect();
        for pv_name in self.particle_vectors.keys().chain(self.object_vectors.keys()) {
            for requested in self.interactions.cutoffs_for_pv(pv_name) {
                if best_fit_cutoff(&available, requested, tolerance).is_none() {
                    return Err(CoreError::InvariantViolation {
                        task: "prepareInteractions".to_string(),
                        detail: format!("no cell list covers requested cutoff {requested} for '{pv_name}'"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Phase 4 (spec.md §4.7): every bouncer's PV must have a
    /// registered integrator.
    pub fn prepare_bouncers_and_walls(&mut self) -> Result<(), CoreError> {
        for bouncer in &self.bouncers {
            let pv = bouncer.pv_name();
            if !self.integrators.contains_key(pv) {
                return Err(CoreError::Configuration(ConfigurationError::BouncerWithoutIntegrator {
                    bouncer: bouncer.name().to_string(),
                    pv: pv.to_string(),
                }));
            }
        }
        Ok(())
    }

    /// Phase 5 (spec.md §4.7): allocate one exchange helper per PV/OV
    /// per exchange kind.
    pub fn prepare_engines(&mut self) {
        let comm = self.comm;
        for name in self.particle_vectors.keys().cloned().collect::<Vec<_>>() {
            self.particle_halo_helpers
                .entry(name.clone())
                .or_insert_with(|| ExchangeHelper::new(&comm));
            self.particle_redist_helpers
                .entry(name)
                .or_insert_with(|| ExchangeHelper::new(&comm));
        }
        for name in self.object_vectors.keys().cloned().collect::<Vec<_>>() {
            self.object_halo_helpers
                .entry(name.clone())
                .or_insert_with(|| ExchangeHelper::new(&comm));
            self.object_redist_helpers
                .entry(name)
                .or_insert_with(|| ExchangeHelper::new(&comm));
        }
    }

    /// Phase 6 (spec.md §4.7, §4.6): assemble the per-step DAG.
    /// `forceExec`s the initial object halo setup so the first step's
    /// interactions see a populated halo even before `run()`'s first
    /// scheduled pass.
    pub fn create_tasks_and_build_dependencies(&mut self) -> Result<(), CoreError> {
        use crate::scheduler::Priority::{High, Low, Normal};

        let has_objects = !self.object_vectors.is_empty();
        let checkpoint_stride = self.config.checkpoint_stride;

        self.scheduler.add_task(BUILD_CELL_LISTS, Normal, 1, noop());
        self.scheduler.add_task(CLEAR_INTERMEDIATE, Normal, 1, noop());
        self.scheduler.add_task(PARTICLE_HALO_INIT, High, 1, noop());
        self.scheduler.add_task(PARTICLE_HALO_FINALIZE, High, 1, noop());
        if has_objects {
            self.scheduler.add_task(OBJECT_HALO_INIT, High, 1, noop());
            self.scheduler.add_task(OBJECT_HALO_FINALIZE, High, 1, noop());
        }
        self.scheduler.add_task(LOCAL_INTERMEDIATE, Normal, 1, noop());
        self.scheduler.add_task(HALO_INTERMEDIATE, Normal, 1, noop());
        self.scheduler.add_task(ACCUMULATE_INTERMEDIATE, Normal, 1, noop());
        self.scheduler.add_task(CLEAR_FINAL, High, 1, noop());
        self.scheduler.add_task(LOCAL_FINAL, Normal, 1, noop());
        self.scheduler.add_task(HALO_FINAL, Normal, 1, noop());
        self.scheduler.add_task(ACCUMULATE_FINAL, Normal, 1, noop());
        if has_objects {
            self.scheduler.add_task(OBJECT_REVERSE_INTERMEDIATE, Normal, 1, noop());
            self.scheduler.add_task(OBJECT_REVERSE_FINAL, Normal, 1, noop());
        }
        self.scheduler.add_task(INTEGRATE, Normal, 1, noop());
        self.scheduler.add_task(WALL_BOUNCE, Normal, 1, noop());
        if has_objects {
            self.scheduler.add_task(OBJECT_LOCAL_BOUNCE, Normal, 1, noop());
            self.scheduler.add_task(OBJECT_HALO_BOUNCE, Normal, 1, noop());
        }
        self.scheduler.add_task(PARTICLE_REDISTRIBUTE, Normal, 1, noop());
        if has_objects {
            self.scheduler.add_task(OBJECT_REDISTRIBUTE, Normal, 1, noop());
        }
        self.scheduler.add_task(PLUGIN_BEFORE_CELL_LISTS, Normal, 1, noop());
        self.scheduler.add_task(PLUGIN_BEFORE_FORCES, Normal, 1, noop());
        self.scheduler.add_task(PLUGIN_SERIALIZE_AND_SEND, Normal, 1, noop());
        self.scheduler.add_task(PLUGIN_BEFORE_INTEGRATION, Normal, 1, noop());
        self.scheduler.add_task(PLUGIN_AFTER_INTEGRATION, Normal, 1, noop());
        self.scheduler
            .add_task(PLUGIN_BEFORE_PARTICLE_DISTRIBUTION, Normal, 1, noop());
        self.scheduler.add_task(WALL_INTEGRITY_CHECK, Low, 1, noop());
        self.scheduler
            .add_task(CHECKPOINT, Low, checkpoint_stride.max(1), noop());

        self.scheduler
            .add_dependency(PLUGIN_BEFORE_CELL_LISTS, &[BUILD_CELL_LISTS], &[])?;
        self.scheduler
            .add_dependency(BUILD_CELL_LISTS, &[PARTICLE_HALO_INIT, CLEAR_INTERMEDIATE], &[])?;
        self.scheduler
            .add_dependency(PARTICLE_HALO_INIT, &[PARTICLE_HALO_FINALIZE], &[])?;
        if has_objects {
            self.scheduler
                .add_dependency(BUILD_CELL_LISTS, &[OBJECT_HALO_INIT], &[])?;
            self.scheduler
                .add_dependency(OBJECT_HALO_INIT, &[OBJECT_HALO_FINALIZE], &[])?;
            self.scheduler.add_dependency(
                LOCAL_INTERMEDIATE,
                &[],
                &[PARTICLE_HALO_FINALIZE, OBJECT_HALO_FINALIZE, CLEAR_INTERMEDIATE],
            )?;
        } else {
            self.scheduler
                .add_dependency(LOCAL_INTERMEDIATE, &[], &[PARTICLE_HALO_FINALIZE, CLEAR_INTERMEDIATE])?;
        }
        self.scheduler
            .add_dependency(PLUGIN_BEFORE_FORCES, &[LOCAL_INTERMEDIATE], &[])?;
        self.scheduler
            .add_dependency(LOCAL_INTERMEDIATE, &[HALO_INTERMEDIATE], &[])?;
        self.scheduler
            .add_dependency(ACCUMULATE_INTERMEDIATE, &[CLEAR_FINAL], &[LOCAL_INTERMEDIATE, HALO_INTERMEDIATE])?;
        self.scheduler
            .add_dependency(CLEAR_FINAL, &[LOCAL_FINAL], &[])?;
        self.scheduler.add_dependency(LOCAL_FINAL, &[HALO_FINAL], &[])?;
        self.scheduler
            .add_dependency(ACCUMULATE_FINAL, &[], &[LOCAL_FINAL, HALO_FINAL])?;
        if has_objects {
            self.scheduler
                .add_dependency(OBJECT_REVERSE_INTERMEDIATE, &[], &[ACCUMULATE_INTERMEDIATE])?;
            self.scheduler
                .add_dependency(OBJECT_REVERSE_FINAL, &[INTEGRATE], &[ACCUMULATE_FINAL])?;
        } else {
            self.scheduler.add_dependency(INTEGRATE, &[], &[ACCUMULATE_FINAL])?;
        }
        self.scheduler
            .add_dependency(PLUGIN_SERIALIZE_AND_SEND, &[], &[ACCUMULATE_FINAL])?;
        self.scheduler
            .add_dependency(PLUGIN_BEFORE_INTEGRATION, &[INTEGRATE], &[])?;
        self.scheduler
            .add_dependency(PLUGIN_AFTER_INTEGRATION, &[], &[INTEGRATE])?;
        self.scheduler
            .add_dependency(WALL_BOUNCE, &[], &[PLUGIN_AFTER_INTEGRATION])?;
        if has_objects {
            self.scheduler.add_dependency(OBJECT_LOCAL_BOUNCE, &[], &[WALL_BOUNCE])?;
            self.scheduler
                .add_dependency(OBJECT_HALO_BOUNCE, &[], &[OBJECT_LOCAL_BOUNCE])?;
            self.scheduler.add_dependency(
                PLUGIN_BEFORE_PARTICLE_DISTRIBUTION,
                &[],
                &[OBJECT_HALO_BOUNCE],
            )?;
            self.scheduler
                .add_dependency(OBJECT_REDISTRIBUTE, &[], &[PLUGIN_BEFORE_PARTICLE_DISTRIBUTION])?;
        } else {
            self.scheduler
                .add_dependency(PLUGIN_BEFORE_PARTICLE_DISTRIBUTION, &[], &[WALL_BOUNCE])?;
        }
        self.scheduler
            .add_dependency(PARTICLE_REDISTRIBUTE, &[], &[PLUGIN_BEFORE_PARTICLE_DISTRIBUTION])?;
        self.scheduler
            .add_dependency(WALL_INTEGRITY_CHECK, &[], &[PARTICLE_REDISTRIBUTE])?;
        self.scheduler
            .add_dependency(CHECKPOINT, &[], &[PARTICLE_REDISTRIBUTE])?;

        self.scheduler.compile()?;

        if has_objects {
            self.force_exec_initial_object_halo()?;
        }
        Ok(())
    }

    fn force_exec_initial_object_halo(&mut self) -> Result<(), CoreError> {
        self.execute_task(OBJECT_HALO_INIT, StreamToken::default())?;
        self.execute_task(OBJECT_HALO_FINALIZE, StreamToken::default())
    }

    /// Phase 7 (spec.md §4.7): split initial particle sets via
    /// registered belonging-checkers.
    pub fn exec_splitters(&mut self, assignments: &[(String, String, String)]) -> Result<(), CoreError> {
        for (checker_name, src_pv, ov_name) in assignments {
            let checker = self
                .belonging_checkers
                .get(checker_name)
                .ok_or_else(|| CoreError::Configuration(ConfigurationError::UnknownComponent(checker_name.clone())))?;
            let pv = self
                .particle_vectors
                .get(src_pv)
                .ok_or_else(|| CoreError::Configuration(ConfigurationError::UnknownComponent(src_pv.clone())))?;
            let ov = self
                .object_vectors
                .get(ov_name)
                .ok_or_else(|| CoreError::Configuration(ConfigurationError::UnknownComponent(ov_name.clone())))?;
            let _split = checker.split(pv, ov);
            // The caller is expected to build new PVs from the returned
            // index partition; this driver only runs the classification
            // pass (spec.md §4.7 phase 7).
        }
        Ok(())
    }

    /// Phase 8 (spec.md §4.7): run `nsteps`, then rebuild cell lists
    /// once so they reflect post-integration positions.
    pub fn run(&mut self, nsteps: u64) -> Result<(), CoreError> {
        let begin = self.state.current_step;
        for step in begin..begin + nsteps {
            if let Some(order) = self.scheduler.compiled_order().map(|o| o.to_vec()) {
                for id in order {
                    if !self.scheduler.should_run(id, step) {
                        continue;
                    }
                    let name = self.scheduler.task_name(id).to_string();
                    self.execute_task(&name, StreamToken::default())
                        .map_err(|e| {
                            e.log_and_abort_style(&name, step);
                            e
                        })?;
                }
            }
            self.state.advance();
        }
        self.rebuild_all_cell_lists(StreamToken::default())?;
        Ok(())
    }

    fn rebuild_all_cell_lists(&mut self, stream: StreamToken) -> Result<(), CoreError> {
        for i in 0..self.cell_lists.len() {
            let pv_name = self.cell_lists[i].pv_name.clone();
            if let Some(pv) = self.particle_vectors.get_mut(&pv_name) {
                self.cell_lists[i].build(pv, stream)?;
            } else if let Some(ov) = self.object_vectors.get_mut(&pv_name) {
                self.cell_lists[i].build(ov.base_mut(), stream)?;
            }
        }
        Ok(())
    }

    fn execute_task(&mut self, name: &str, stream: StreamToken) -> Result<(), CoreError> {
        match name {
            BUILD_CELL_LISTS => self.task_build_cell_lists(stream),
            CLEAR_INTERMEDIATE | CLEAR_FINAL => self.task_clear_transient_channels(stream),
            PARTICLE_HALO_INIT => self.task_particle_halo_init(stream),
            PARTICLE_HALO_FINALIZE => self.task_particle_halo_finalize(stream),
            OBJECT_HALO_INIT => self.task_object_halo_init(stream),
            OBJECT_HALO_FINALIZE => self.task_object_halo_finalize(stream),
            LOCAL_INTERMEDIATE => {
                self.interactions.execute_local_intermediate(stream);
                Ok(())
            }
            HALO_INTERMEDIATE => {
                self.interactions.execute_halo_intermediate(stream);
                Ok(())
            }
            LOCAL_FINAL => {
                self.interactions.execute_local_final(stream);
                Ok(())
            }
            HALO_FINAL => {
                self.interactions.execute_halo_final(stream);
                Ok(())
            }
            ACCUMULATE_INTERMEDIATE => self.task_accumulate_intermediate(stream),
            ACCUMULATE_FINAL => self.task_accumulate_final(stream),
            OBJECT_REVERSE_INTERMEDIATE | OBJECT_REVERSE_FINAL => self.task_object_reverse_exchange(stream),
            INTEGRATE => self.task_integrate(stream),
            WALL_BOUNCE | OBJECT_LOCAL_BOUNCE | OBJECT_HALO_BOUNCE => self.task_bounce(stream),
            PARTICLE_REDISTRIBUTE => self.task_particle_redistribute(stream),
            OBJECT_REDISTRIBUTE => self.task_object_redistribute(stream),
            PLUGIN_BEFORE_CELL_LISTS => self.task_plugins(|p, s, st| p.before_cell_lists(s, st)),
            PLUGIN_BEFORE_FORCES => self.task_plugins(|p, s, st| p.before_forces(s, st)),
            PLUGIN_SERIALIZE_AND_SEND => self.task_plugins(|p, s, st| p.serialize_and_send(s, st)),
            PLUGIN_BEFORE_INTEGRATION => self.task_plugins(|p, s, st| p.before_integration(s, st)),
            PLUGIN_AFTER_INTEGRATION => self.task_plugins(|p, s, st| p.after_integration(s, st)),
            PLUGIN_BEFORE_PARTICLE_DISTRIBUTION => {
                self.task_plugins(|p, s, st| p.before_particle_distribution(s, st))
            }
            WALL_INTEGRITY_CHECK => self.task_wall_integrity_check(stream),
            CHECKPOINT => self.task_checkpoint(),
            other => Err(CoreError::InvariantViolation {
                task: other.to_string(),
                detail: "no dispatch registered for this task name".to_string(),
            }),
        }
    }

    fn task_build_cell_lists(&mut self, stream: StreamToken) -> Result<(), CoreError> {
        for i in 0..self.cell_lists.len() {
            let pv_name = self.cell_lists[i].pv_name.clone();
            let motion_stamp = self
                .particle_vectors
                .get(&pv_name)
                .map(|pv| pv.motion_stamp())
                .or_else(|| self.object_vectors.get(&pv_name).map(|ov| ov.base().motion_stamp()));
            let Some(motion_stamp) = motion_stamp else { continue };
            if !self.cell_lists[i].needs_rebuild(motion_stamp) {
                continue;
            }
            if let Some(pv) = self.particle_vectors.get_mut(&pv_name) {
                self.cell_lists[i].build(pv, stream)?;
            } else if let Some(ov) = self.object_vectors.get_mut(&pv_name) {
                self.cell_lists[i].build(ov.base_mut(), stream)?;
            }
        }
        Ok(())
    }

    fn task_clear_transient_channels(&mut self, stream: StreamToken) -> Result<(), CoreError> {
        for pv in self.particle_vectors.values_mut() {
            pv.local.clear_transient_channels::<f64>(stream);
            pv.local.clear_transient_channels::<DVec3>(stream);
        }
        for ov in self.object_vectors.values_mut() {
            ov.base_mut().local.clear_transient_channels::<f64>(stream);
            ov.base_mut().local.clear_transient_channels::<DVec3>(stream);
        }
        Ok(())
    }

    fn task_particle_halo_init(&mut self, stream: StreamToken) -> Result<(), CoreError> {
        let domain = self.state.domain;
        let comm = self.comm;
        let names: Vec<String> = self.particle_vectors.keys().cloned().collect();
        for pv_name in names {
            let rc = self.interactions.effective_cutoff(&pv_name).unwrap_or(0.0);
            if rc <= 0.0 {
                continue;
            }
            let neighbour_rank = move |f: Fragment| comm.neighbour_rank(f);
            let Some(pv) = self.particle_vectors.get_mut(&pv_name) else { continue };
            let mut exch = ParticleHaloExchanger::new(pv, rc, domain, neighbour_rank);
            exch.prepare_sizes(stream)?;
            let helper = self
                .particle_halo_helpers
                .entry(pv_name.clone())
                .or_insert_with(|| ExchangeHelper::new(&comm));
            exch.pack_into(helper);
            self.engine.init(helper, stream)?;
        }
        Ok(())
    }

    fn task_particle_halo_finalize(&mut self, stream: StreamToken) -> Result<(), CoreError> {
        let domain = self.state.domain;
        let comm = self.comm;
        let names: Vec<String> = self.particle_vectors.keys().cloned().collect();
        for pv_name in names {
            let neighbour_rank = move |f: Fragment| comm.neighbour_rank(f);
            let Some(helper) = self.particle_halo_helpers.get_mut(&pv_name) else { continue };
            self.engine.finalize(helper, stream)?;
            let helper = self.particle_halo_helpers.get(&pv_name).expect("just finalized");
            if let Some(pv) = self.particle_vectors.get_mut(&pv_name) {
                let mut exch = ParticleHaloExchanger::new(pv, 0.0, domain, neighbour_rank);
                exch.unpack_from(helper);
            }
        }
        Ok(())
    }

    fn task_object_halo_init(&mut self, stream: StreamToken) -> Result<(), CoreError> {
        let domain = self.state.domain;
        let comm = self.comm;
        let names: Vec<String> = self.object_vectors.keys().cloned().collect();
        for ov_name in names {
            let rc = self.interactions.effective_cutoff(&ov_name).unwrap_or(0.0);
            let neighbour_rank = move |f: Fragment| comm.neighbour_rank(f);
            let Some(ov) = self.object_vectors.get_mut(&ov_name) else { continue };
            let mut exch = ObjectHaloExchanger::new(ov, rc, domain, neighbour_rank);
            exch.prepare_sizes(stream)?;
            let helper = self
                .object_halo_helpers
                .entry(ov_name.clone())
                .or_insert_with(|| ExchangeHelper::new(&comm));
            exch.pack_into(helper);
            self.object_halo_assignments
                .insert(ov_name.clone(), exch.assignments.clone());
            self.engine.init(helper, stream)?;
        }
        Ok(())
    }

    fn task_object_halo_finalize(&mut self, stream: StreamToken) -> Result<(), CoreError> {
        let domain = self.state.domain;
        let comm = self.comm;
        let names: Vec<String> = self.object_vectors.keys().cloned().collect();
        for ov_name in names {
            let neighbour_rank = move |f: Fragment| comm.neighbour_rank(f);
            let Some(helper) = self.object_halo_helpers.get_mut(&ov_name) else { continue };
            self.engine.finalize(helper, stream)?;
            let helper = self.object_halo_helpers.get(&ov_name).expect("just finalized");
            if let Some(ov) = self.object_vectors.get_mut(&ov_name) {
                let mut exch = ObjectHaloExchanger::new(ov, 0.0, domain, neighbour_rank);
                exch.unpack_from(helper);
            }
        }
        Ok(())
    }

    /// Sums intermediate-stage cell-list-private `f64` channels (e.g.
    /// density) back into the owning PV's channels, then pushes the
    /// now-accumulated PV values into whichever cell list a final-stage
    /// interaction reads them from (spec.md §4.5 `accumulateIntermediates`
    /// followed by `gatherIntermediate`). `DVec3`/`[f64;4]`-typed channels
    /// and object vectors are left to a future extension of this driver
    /// (cell-list support for them already exists, see
    /// [`CellList::accumulate_channels`]).
    fn task_accumulate_intermediate(&mut self, stream: StreamToken) -> Result<(), CoreError> {
        for i in 0..self.cell_lists.len() {
            let pv_name = self.cell_lists[i].pv_name.clone();
            let write_names = self.interactions.write_channel_names(&pv_name, Stage::Intermediate);
            if write_names.is_empty() {
                continue;
            }
            let name_refs: Vec<&str> = write_names.iter().map(String::as_str).collect();
            if let Some(pv) = self.particle_vectors.get_mut(&pv_name) {
                self.cell_lists[i].accumulate_channels::<f64>(pv, &name_refs, stream)?;
            }
        }
        for i in 0..self.cell_lists.len() {
            let pv_name = self.cell_lists[i].pv_name.clone();
            let candidates = self.interactions.read_channel_names(&pv_name);
            if candidates.is_empty() {
                continue;
            }
            if let Some(pv) = self.particle_vectors.get(&pv_name) {
                let read_names: Vec<&str> = candidates
                    .iter()
                    .map(String::as_str)
                    .filter(|n| pv.local.channels.check_exists(n))
                    .collect();
                if read_names.is_empty() {
                    continue;
                }
                self.cell_lists[i].gather_channels::<f64>(pv, &read_names, stream)?;
            }
        }
        Ok(())
    }

    /// Sums final-stage cell-list-private `f64` channels (e.g. force)
    /// back into the owning PV's channels (spec.md §4.5
    /// `accumulateFinal`); the integrator reads the PV channel directly
    /// afterwards, so no further gather is needed.
    fn task_accumulate_final(&mut self, stream: StreamToken) -> Result<(), CoreError> {
        for i in 0..self.cell_lists.len() {
            let pv_name = self.cell_lists[i].pv_name.clone();
            let write_names = self.interactions.write_channel_names(&pv_name, Stage::Final);
            if write_names.is_empty() {
                continue;
            }
            let name_refs: Vec<&str> = write_names.iter().map(String::as_str).collect();
            if let Some(pv) = self.particle_vectors.get_mut(&pv_name) {
                self.cell_lists[i].accumulate_channels::<f64>(pv, &name_refs, stream)?;
            }
        }
        Ok(())
    }

    /// Reduces halo-object per-particle `"force"` contributions back to
    /// the owning rank and adds them into the owning OV's local
    /// `"force"` channel (spec.md §4.4, §4.6). A no-op when no
    /// interaction has registered a `force` channel on either side.
    fn task_object_reverse_exchange(&mut self, stream: StreamToken) -> Result<(), CoreError> {
        let comm = self.comm;
        let names: Vec<String> = self.object_vectors.keys().cloned().collect();
        for ov_name in names {
            let neighbour_rank = move |f: Fragment| comm.neighbour_rank(f);
            let Some(assignments) = self.object_halo_assignments.get(&ov_name).cloned() else { continue };
            let Some(ov) = self.object_vectors.get_mut(&ov_name) else { continue };
            let object_size = ov.object_size();
            let reverse = ObjectReverseExchanger::new(&assignments, object_size, neighbour_rank);
            let halo_len = ov.num_halo_objects() * object_size;
            let halo_forces = match ov.base().halo.channels.get_channel::<DVec3>("force") {
                Ok(buf) => buf.clone(),
                Err(_) => vec![DVec3::ZERO; halo_len],
            };
            let mut helper: ExchangeHelper<DVec3> = ExchangeHelper::new(&comm);
            reverse.pack_into(&halo_forces, &mut helper);
            self.engine.init(&mut helper, stream)?;
            self.engine.finalize(&mut helper, stream)?;
            let owner_len = ov.num_local_objects() * object_size;
            let mut owner_forces = vec![DVec3::ZERO; owner_len];
            reverse.accumulate_into(&helper, &mut owner_forces);
            if let Ok(dst) = ov.base_mut().local.channels.get_channel_mut::<DVec3>("force") {
                for (d, contribution) in dst.iter_mut().zip(owner_forces.iter()) {
                    *d += *contribution;
                }
            }
        }
        Ok(())
    }

    fn task_integrate(&mut self, stream: StreamToken) -> Result<(), CoreError> {
        let names: Vec<String> = self.integrators.keys().cloned().collect();
        for name in names {
            let Some(integrator) = self.integrators.get_mut(&name) else { continue };
            if let Some(pv) = self.particle_vectors.get_mut(&name) {
                integrator.stage(pv, &self.state, stream)?;
            } else if let Some(ov) = self.object_vectors.get_mut(&name) {
                integrator.stage(ov.base_mut(), &self.state, stream)?;
            }
        }
        Ok(())
    }

    fn task_bounce(&mut self, stream: StreamToken) -> Result<(), CoreError> {
        for bouncer in self.bouncers.iter_mut() {
            let name = bouncer.pv_name().to_string();
            if let Some(pv) = self.particle_vectors.get_mut(&name) {
                bouncer.bounce(pv, &self.state, stream)?;
            } else if let Some(ov) = self.object_vectors.get_mut(&name) {
                bouncer.bounce(ov.base_mut(), &self.state, stream)?;
            }
        }
        Ok(())
    }

    fn task_particle_redistribute(&mut self, stream: StreamToken) -> Result<(), CoreError> {
        let domain = self.state.domain;
        let comm = self.comm;
        let names: Vec<String> = self.particle_vectors.keys().cloned().collect();
        for pv_name in names {
            let neighbour_rank = move |f: Fragment| comm.neighbour_rank(f);
            let Some(pv) = self.particle_vectors.get_mut(&pv_name) else { continue };
            let mut redist = ParticleRedistributor::new(pv, domain, neighbour_rank);
            redist.prepare_sizes(stream)?;
            let helper = self
                .particle_redist_helpers
                .entry(pv_name.clone())
                .or_insert_with(|| ExchangeHelper::new(&comm));
            redist.pack_into(helper)?;
            self.engine.init(helper, stream)?;
            self.engine.finalize(helper, stream)?;
            redist.unpack_from(helper);
        }
        Ok(())
    }

    fn task_object_redistribute(&mut self, stream: StreamToken) -> Result<(), CoreError> {
        let domain = self.state.domain;
        let comm = self.comm;
        let names: Vec<String> = self.object_vectors.keys().cloned().collect();
        for ov_name in names {
            let neighbour_rank = move |f: Fragment| comm.neighbour_rank(f);
            let Some(ov) = self.object_vectors.get_mut(&ov_name) else { continue };
            let mut redist = ObjectRedistributor::new(ov, domain, neighbour_rank);
            redist.prepare_sizes(stream)?;
            let helper = self
                .object_redist_helpers
                .entry(ov_name.clone())
                .or_insert_with(|| ExchangeHelper::new(&comm));
            redist.pack_into(helper)?;
            self.engine.init(helper, stream)?;
            self.engine.finalize(helper, stream)?;
            redist.unpack_from(helper);
        }
        Ok(())
    }

    fn task_plugins(
        &mut self,
        hook: impl Fn(&mut Box<dyn crate::plugin::SimulationPlugin>, &crate::state::SimulationState, StreamToken) -> Result<(), CoreError>,
    ) -> Result<(), CoreError> {
        let step = self.state.current_step;
        for plugin in self.plugins.iter_mut() {
            let stride = plugin.stride().max(1) as u64;
            if step % stride != 0 {
                continue;
            }
            hook(plugin, &self.state, StreamToken::default())?;
        }
        Ok(())
    }

    fn task_wall_integrity_check(&mut self, stream: StreamToken) -> Result<(), CoreError> {
        for wall in self.walls.values_mut() {
            wall.prepare(&self.state, stream)?;
        }
        Ok(())
    }

    /// Persists the global clock plus every registered PV/OV's
    /// positions, velocities, and persistent channels, one file per
    /// component named after it (spec.md §6, §8 round-trip law).
    fn task_checkpoint(&mut self) -> Result<(), CoreError> {
        let mut components: Vec<&dyn Checkpointable> = vec![&self.state];
        for pv in self.particle_vectors.values() {
            components.push(pv);
        }
        for ov in self.object_vectors.values() {
            components.push(ov);
        }
        self.checkpoint_manager.checkpoint_all(&components)
    }

    /// Restores the global clock plus every registered PV/OV from
    /// `self.checkpoint_manager`'s folder (spec.md §6). Call once,
    /// before the first step after a restart.
    pub fn restart(&mut self) -> Result<(), CoreError> {
        let mut components: Vec<&mut dyn Checkpointable> = vec![&mut self.state];
        for pv in self.particle_vectors.values_mut() {
            components.push(pv);
        }
        for ov in self.object_vectors.values_mut() {
            components.push(ov);
        }
        self.checkpoint_manager.restart_all(&mut components)
    }
}

trait LogAbortStyle {
    fn log_and_abort_style(&self, task_name: &str, step: u64);
}

impl LogAbortStyle for CoreError {
    fn log_and_abort_style(&self, task_name: &str, step: u64) {
        log::error!("task '{task_name}' failed fatally on step {step}: {self}");
    }
}
